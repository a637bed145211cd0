//! Conversion between [`SocketAddress`] and the raw `sockaddr` family structs.

use crate::SocketError;
use crate::utils::ensure;

use libc::{c_int, sockaddr_storage, socklen_t};
use std::ffi::OsStr;
use std::fmt;
use std::mem;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr, SocketAddrV4, SocketAddrV6};
use std::os::unix::ffi::OsStrExt;
use std::path::{Path, PathBuf};

/// Address of a socket endpoint.
///
/// Only the internet and unix-domain families are understood; anything else
/// returned by the OS is reported as [`SocketError::UnsupportedAddress`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum SocketAddress {
    Inet(SocketAddrV4),
    Inet6(SocketAddrV6),
    Unix(PathBuf),
}

impl SocketAddress {
    pub fn loopback(port: u16) -> Self {
        Self::Inet(SocketAddrV4::new(Ipv4Addr::LOCALHOST, port))
    }

    pub fn unix<P: AsRef<Path>>(path: P) -> Self {
        Self::Unix(path.as_ref().to_path_buf())
    }

    pub fn family(&self) -> c_int {
        match self {
            Self::Inet(_) => libc::AF_INET,
            Self::Inet6(_) => libc::AF_INET6,
            Self::Unix(_) => libc::AF_UNIX,
        }
    }

    /// Port of an internet address, `None` for unix-domain addresses.
    pub fn port(&self) -> Option<u16> {
        match self {
            Self::Inet(addr) => Some(addr.port()),
            Self::Inet6(addr) => Some(addr.port()),
            Self::Unix(_) => None,
        }
    }

    pub(crate) fn to_storage(&self) -> Result<(sockaddr_storage, socklen_t), SocketError> {
        // SAFETY: all-zero bytes are a valid `sockaddr_storage`.
        let mut storage: sockaddr_storage = unsafe { mem::zeroed() };
        let len = match self {
            Self::Inet(addr) => {
                // SAFETY: `sockaddr_storage` is sized and aligned for every sockaddr family.
                let sin = unsafe { &mut *(&raw mut storage).cast::<libc::sockaddr_in>() };
                sin.sin_family = libc::AF_INET as libc::sa_family_t;
                sin.sin_port = addr.port().to_be();
                sin.sin_addr = libc::in_addr { s_addr: u32::from_ne_bytes(addr.ip().octets()) };
                #[cfg(any(target_vendor = "apple", target_os = "freebsd", target_os = "openbsd", target_os = "dragonfly"))]
                {
                    sin.sin_len = mem::size_of::<libc::sockaddr_in>() as u8;
                }
                mem::size_of::<libc::sockaddr_in>()
            }
            Self::Inet6(addr) => {
                // SAFETY: `sockaddr_storage` is sized and aligned for every sockaddr family.
                let sin6 = unsafe { &mut *(&raw mut storage).cast::<libc::sockaddr_in6>() };
                sin6.sin6_family = libc::AF_INET6 as libc::sa_family_t;
                sin6.sin6_port = addr.port().to_be();
                sin6.sin6_flowinfo = addr.flowinfo();
                sin6.sin6_addr = libc::in6_addr { s6_addr: addr.ip().octets() };
                sin6.sin6_scope_id = addr.scope_id();
                #[cfg(any(target_vendor = "apple", target_os = "freebsd", target_os = "openbsd", target_os = "dragonfly"))]
                {
                    sin6.sin6_len = mem::size_of::<libc::sockaddr_in6>() as u8;
                }
                mem::size_of::<libc::sockaddr_in6>()
            }
            Self::Unix(path) => {
                // SAFETY: `sockaddr_storage` is sized and aligned for every sockaddr family.
                let sun = unsafe { &mut *(&raw mut storage).cast::<libc::sockaddr_un>() };
                let bytes = path.as_os_str().as_bytes();
                // keep room for the trailing NUL
                ensure!(bytes.len() < sun.sun_path.len(), SocketError::UnsupportedAddress);
                sun.sun_family = libc::AF_UNIX as libc::sa_family_t;
                for (dst, src) in sun.sun_path.iter_mut().zip(bytes) {
                    *dst = *src as libc::c_char;
                }
                mem::size_of::<libc::sockaddr_un>()
            }
        };
        Ok((storage, len as socklen_t))
    }

    pub(crate) fn from_storage(storage: &sockaddr_storage) -> Result<Self, SocketError> {
        match c_int::from(storage.ss_family) {
            libc::AF_INET => {
                // SAFETY: the family tag says the storage holds a `sockaddr_in`.
                let sin = unsafe { &*std::ptr::from_ref(storage).cast::<libc::sockaddr_in>() };
                let ip = Ipv4Addr::from(sin.sin_addr.s_addr.to_ne_bytes());
                Ok(Self::Inet(SocketAddrV4::new(ip, u16::from_be(sin.sin_port))))
            }
            libc::AF_INET6 => {
                // SAFETY: the family tag says the storage holds a `sockaddr_in6`.
                let sin6 = unsafe { &*std::ptr::from_ref(storage).cast::<libc::sockaddr_in6>() };
                let ip = Ipv6Addr::from(sin6.sin6_addr.s6_addr);
                Ok(Self::Inet6(SocketAddrV6::new(
                    ip,
                    u16::from_be(sin6.sin6_port),
                    sin6.sin6_flowinfo,
                    sin6.sin6_scope_id,
                )))
            }
            libc::AF_UNIX => {
                // SAFETY: the family tag says the storage holds a `sockaddr_un`.
                let sun = unsafe { &*std::ptr::from_ref(storage).cast::<libc::sockaddr_un>() };
                let bytes: Vec<u8> = sun.sun_path.iter().take_while(|c| **c != 0).map(|c| *c as u8).collect();
                Ok(Self::Unix(PathBuf::from(OsStr::from_bytes(&bytes))))
            }
            _ => Err(SocketError::UnsupportedAddress),
        }
    }
}

impl From<SocketAddr> for SocketAddress {
    fn from(addr: SocketAddr) -> Self {
        match addr {
            SocketAddr::V4(v4) => Self::Inet(v4),
            SocketAddr::V6(v6) => Self::Inet6(v6),
        }
    }
}

impl fmt::Display for SocketAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Inet(addr) => addr.fmt(f),
            Self::Inet6(addr) => addr.fmt(f),
            Self::Unix(path) => write!(f, "unix:{}", path.display()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inet_address_survives_storage() {
        let address = SocketAddress::from("192.168.0.7:8080".parse::<SocketAddr>().unwrap());
        let (storage, len) = address.to_storage().unwrap();
        assert_eq!(len as usize, mem::size_of::<libc::sockaddr_in>());
        assert_eq!(SocketAddress::from_storage(&storage).unwrap(), address);
    }

    #[test]
    fn inet6_address_survives_storage() {
        let address = SocketAddress::from("[::1]:443".parse::<SocketAddr>().unwrap());
        let (storage, _) = address.to_storage().unwrap();
        assert_eq!(SocketAddress::from_storage(&storage).unwrap(), address);
        assert_eq!(address.port(), Some(443));
    }

    #[test]
    fn unix_address_survives_storage() {
        let address = SocketAddress::unix("/tmp/ferry.sock");
        let (storage, _) = address.to_storage().unwrap();
        assert_eq!(SocketAddress::from_storage(&storage).unwrap(), address);
        assert_eq!(address.to_string(), "unix:/tmp/ferry.sock");
    }

    #[test]
    fn unix_path_too_long_is_unsupported() {
        let address = SocketAddress::unix("x".repeat(200));
        assert_eq!(address.to_storage().unwrap_err(), SocketError::UnsupportedAddress);
    }

    #[test]
    fn unknown_family_is_unsupported() {
        // SAFETY: all-zero bytes are a valid `sockaddr_storage`.
        let mut storage: sockaddr_storage = unsafe { mem::zeroed() };
        storage.ss_family = libc::AF_UNSPEC as libc::sa_family_t;
        assert_eq!(SocketAddress::from_storage(&storage).unwrap_err(), SocketError::UnsupportedAddress);
    }
}
