use crate::utils::{find_available_port, is_port_available};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PortCheck {
    pub port: u16,
    pub available: bool,
    /// 端口被占用时，向上查找到的第一个空闲端口
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suggestion: Option<u16>,
}

pub fn check_port_available(port: u16) -> PortCheck {
    let available = is_port_available(port);
    let suggestion = if available {
        None
    } else {
        find_available_port(port.saturating_add(1), port.saturating_add(100))
    };
    PortCheck {
        port,
        available,
        suggestion,
    }
}
