use std::net::TcpListener;

/// 检查指定端口是否可用（回环地址和通配地址都能绑定才算可用）
pub fn is_port_available(port: u16) -> bool {
    // 逐个绑定并立即释放，两个监听不能同时存在
    for host in ["127.0.0.1", "0.0.0.0"] {
        match TcpListener::bind((host, port)) {
            Ok(listener) => drop(listener),
            Err(_) => return false,
        }
    }
    true
}

/// 从 `start` 开始顺序查找第一个可用端口
pub fn find_available_port(start: u16, end: u16) -> Option<u16> {
    (start..=end).find(|port| is_port_available(*port))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bound_port_is_unavailable() {
        let listener = TcpListener::bind(("127.0.0.1", 0)).unwrap();
        let port = listener.local_addr().unwrap().port();
        assert!(!is_port_available(port));

        drop(listener);
        assert!(is_port_available(port));
    }

    #[test]
    fn test_find_available_port() {
        let result = find_available_port(58000, 59000);
        assert!(result.is_some());
    }
}
