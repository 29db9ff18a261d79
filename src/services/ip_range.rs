//! 地址范围解析
//!
//! 支持 CIDR、`start-end` 区间、单地址（IPv4 / IPv6），多个范围可用逗号分隔。
//! 展开结果有序且去重；超过上限的范围直接拒绝。

use std::collections::HashSet;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use ipnet::IpNet;
use thiserror::Error;

use crate::config::env::constants::DEFAULT_SSH_PORT;
use crate::domain::discovery::PortsInput;

/// 地址范围无效
#[derive(Debug, Error, PartialEq)]
pub enum InvalidRangeError {
    #[error("address range is empty")]
    Empty,

    #[error("malformed address range: {0}")]
    Malformed(String),

    #[error("address family mismatch in range: {0}")]
    MixedFamilies(String),

    #[error("range start is after end: {0}")]
    Reversed(String),

    #[error("range covers {count} addresses, limit is {max}")]
    TooLarge { count: u128, max: usize },
}

/// 端口列表无效
#[derive(Debug, Error, PartialEq)]
#[error("invalid port: {0}")]
pub struct InvalidPortError(pub String);

/// 一段连续地址
#[derive(Debug, Clone, PartialEq)]
pub enum Segment {
    Net(IpNet),
    Span(IpAddr, IpAddr),
}

impl Segment {
    fn bounds(&self) -> (IpAddr, IpAddr) {
        match self {
            Segment::Net(net) => (net.network(), net.broadcast()),
            Segment::Span(start, end) => (*start, *end),
        }
    }

    /// 地址数
    pub fn count(&self) -> u128 {
        match self.bounds() {
            (IpAddr::V4(a), IpAddr::V4(b)) => (u32::from(b) - u32::from(a)) as u128 + 1,
            (IpAddr::V6(a), IpAddr::V6(b)) => {
                (u128::from(b) - u128::from(a)).saturating_add(1)
            }
            _ => 0,
        }
    }

    pub fn contains(&self, ip: &IpAddr) -> bool {
        match (self.bounds(), ip) {
            ((IpAddr::V4(a), IpAddr::V4(b)), IpAddr::V4(x)) => {
                (u32::from(a)..=u32::from(b)).contains(&u32::from(*x))
            }
            ((IpAddr::V6(a), IpAddr::V6(b)), IpAddr::V6(x)) => {
                (u128::from(a)..=u128::from(b)).contains(&u128::from(*x))
            }
            _ => false,
        }
    }

    fn expand_into(&self, out: &mut Vec<IpAddr>) {
        match self.bounds() {
            (IpAddr::V4(a), IpAddr::V4(b)) => {
                out.extend(
                    (u32::from(a)..=u32::from(b)).map(|n| IpAddr::V4(Ipv4Addr::from(n))),
                );
            }
            (IpAddr::V6(a), IpAddr::V6(b)) => {
                out.extend(
                    (u128::from(a)..=u128::from(b)).map(|n| IpAddr::V6(Ipv6Addr::from(n))),
                );
            }
            _ => {}
        }
    }
}

/// 解析为地址段，不展开
pub fn parse_segments(spec: &str) -> Result<Vec<Segment>, InvalidRangeError> {
    let parts: Vec<&str> = spec
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect();
    if parts.is_empty() {
        return Err(InvalidRangeError::Empty);
    }
    parts.into_iter().map(parse_segment).collect()
}

fn parse_segment(part: &str) -> Result<Segment, InvalidRangeError> {
    if part.contains('/') {
        let net: IpNet = part
            .parse()
            .map_err(|_| InvalidRangeError::Malformed(part.to_string()))?;
        return Ok(Segment::Net(net.trunc()));
    }

    if let Some((start, end)) = part.split_once('-') {
        let start: IpAddr = start
            .trim()
            .parse()
            .map_err(|_| InvalidRangeError::Malformed(part.to_string()))?;
        let end = parse_range_end(&start, end.trim())
            .ok_or_else(|| InvalidRangeError::Malformed(part.to_string()))?;

        let ordered = match (start, end) {
            (IpAddr::V4(a), IpAddr::V4(b)) => u32::from(a) <= u32::from(b),
            (IpAddr::V6(a), IpAddr::V6(b)) => u128::from(a) <= u128::from(b),
            _ => return Err(InvalidRangeError::MixedFamilies(part.to_string())),
        };
        if !ordered {
            return Err(InvalidRangeError::Reversed(part.to_string()));
        }
        return Ok(Segment::Span(start, end));
    }

    let ip: IpAddr = part
        .parse()
        .map_err(|_| InvalidRangeError::Malformed(part.to_string()))?;
    Ok(Segment::Span(ip, ip))
}

/// 区间结尾：完整地址，或 IPv4 的末段简写（`10.0.0.1-20`）
fn parse_range_end(start: &IpAddr, end: &str) -> Option<IpAddr> {
    if let Ok(ip) = end.parse::<IpAddr>() {
        return Some(ip);
    }
    match start {
        IpAddr::V4(v4) => {
            let last: u8 = end.parse().ok()?;
            let [a, b, c, _] = v4.octets();
            Some(IpAddr::V4(Ipv4Addr::new(a, b, c, last)))
        }
        IpAddr::V6(_) => None,
    }
}

/// 展开为有序去重的地址列表
pub fn resolve(spec: &str, max_addresses: usize) -> Result<Vec<IpAddr>, InvalidRangeError> {
    let segments = parse_segments(spec)?;

    let total = segments
        .iter()
        .fold(0u128, |acc, s| acc.saturating_add(s.count()));
    if total > max_addresses as u128 {
        return Err(InvalidRangeError::TooLarge {
            count: total,
            max: max_addresses,
        });
    }

    let mut expanded = Vec::with_capacity(total as usize);
    for segment in &segments {
        segment.expand_into(&mut expanded);
    }

    let mut seen = HashSet::with_capacity(expanded.len());
    expanded.retain(|ip| seen.insert(*ip));
    Ok(expanded)
}

/// 地址是否落在任一范围内（无效范围视为不匹配）
pub fn in_scope(spec: &str, ip: &IpAddr) -> bool {
    parse_segments(spec)
        .map(|segments| segments.iter().any(|s| s.contains(ip)))
        .unwrap_or(false)
}

/// 解析端口参数，空则为 [22]
pub fn parse_ports(input: &PortsInput) -> Result<Vec<u16>, InvalidPortError> {
    let raw: Vec<String> = match input {
        PortsInput::Text(text) => text
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect(),
        PortsInput::List(list) => list.iter().map(|p| p.to_string()).collect(),
    };

    if raw.is_empty() {
        return Ok(vec![DEFAULT_SSH_PORT]);
    }

    let mut ports = Vec::with_capacity(raw.len());
    for item in raw {
        let port: u16 = item.parse().map_err(|_| InvalidPortError(item.clone()))?;
        if port == 0 {
            return Err(InvalidPortError(item));
        }
        if !ports.contains(&port) {
            ports.push(port);
        }
    }
    Ok(ports)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn v4(s: &str) -> IpAddr {
        s.parse().unwrap()
    }

    #[test]
    fn test_cidr_includes_network_and_broadcast() {
        let ips = resolve("192.168.1.0/30", 1024).unwrap();
        assert_eq!(
            ips,
            vec![
                v4("192.168.1.0"),
                v4("192.168.1.1"),
                v4("192.168.1.2"),
                v4("192.168.1.3")
            ]
        );
    }

    #[test]
    fn test_cidr_count_matches_prefix() {
        for prefix in 20..=32u32 {
            let ips = resolve(&format!("10.20.0.0/{}", prefix), 65_536).unwrap();
            assert_eq!(ips.len(), 1usize << (32 - prefix));
            let unique: HashSet<_> = ips.iter().collect();
            assert_eq!(unique.len(), ips.len());
        }
    }

    #[test]
    fn test_cidr_with_host_bits_is_truncated() {
        let ips = resolve("10.0.0.5/31", 16).unwrap();
        assert_eq!(ips, vec![v4("10.0.0.4"), v4("10.0.0.5")]);
    }

    #[test]
    fn test_dash_range_inclusive() {
        assert_eq!(resolve("10.0.0.5-10.0.0.5", 16).unwrap(), vec![v4("10.0.0.5")]);
        assert_eq!(resolve("10.0.0.1-3", 16).unwrap().len(), 3);
        assert_eq!(resolve("fd00::1-fd00::4", 16).unwrap().len(), 4);
    }

    #[test]
    fn test_single_and_list_dedup() {
        let ips = resolve("10.0.0.2, 10.0.0.1-10.0.0.3", 16).unwrap();
        assert_eq!(ips, vec![v4("10.0.0.2"), v4("10.0.0.1"), v4("10.0.0.3")]);
    }

    #[test]
    fn test_invalid_ranges() {
        assert_eq!(resolve("", 16), Err(InvalidRangeError::Empty));
        assert!(matches!(resolve("10.0.0", 16), Err(InvalidRangeError::Malformed(_))));
        assert!(matches!(resolve("10.0.0.0/33", 16), Err(InvalidRangeError::Malformed(_))));
        assert!(matches!(
            resolve("10.0.0.1-fd00::1", 16),
            Err(InvalidRangeError::MixedFamilies(_))
        ));
        assert!(matches!(
            resolve("10.0.0.9-10.0.0.1", 16),
            Err(InvalidRangeError::Reversed(_))
        ));
    }

    #[test]
    fn test_large_range_rejected() {
        assert_eq!(
            resolve("10.0.0.0/8", 65_536),
            Err(InvalidRangeError::TooLarge {
                count: 1 << 24,
                max: 65_536
            })
        );
        assert!(matches!(
            resolve("fd00::/64", 65_536),
            Err(InvalidRangeError::TooLarge { .. })
        ));
    }

    #[test]
    fn test_matches_scope() {
        assert!(in_scope("10.0.0.0/24", &v4("10.0.0.77")));
        assert!(in_scope("10.0.1.1, 10.0.2.0-10.0.2.9", &v4("10.0.2.9")));
        assert!(!in_scope("10.0.0.0/24", &v4("10.0.1.1")));
        assert!(!in_scope("garbage", &v4("10.0.0.1")));
    }

    #[test]
    fn test_parse_ports() {
        assert_eq!(parse_ports(&PortsInput::Text(String::new())).unwrap(), vec![22]);
        assert_eq!(
            parse_ports(&PortsInput::Text("22, 9100,22".into())).unwrap(),
            vec![22, 9100]
        );
        assert_eq!(parse_ports(&PortsInput::List(vec![80, 443])).unwrap(), vec![80, 443]);
        assert!(parse_ports(&PortsInput::Text("0".into())).is_err());
        assert!(parse_ports(&PortsInput::Text("ssh".into())).is_err());
        assert!(parse_ports(&PortsInput::List(vec![70000])).is_err());
    }
}
