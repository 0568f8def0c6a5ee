//! Loopback port selection for the OAuth redirect listener

use std::net::{Ipv4Addr, TcpListener};

use tracing::debug;

use crate::error::{Error, Result};

/// Return the first candidate port that can be bound on 127.0.0.1.
///
/// The test socket is closed before returning, so the port is only known to
/// have been free at the time of the call. A candidate of `0` asks the OS for
/// an ephemeral port and returns the one assigned.
pub fn allocate(candidates: &[u16]) -> Result<u16> {
    for &port in candidates {
        match TcpListener::bind((Ipv4Addr::LOCALHOST, port)) {
            Ok(listener) => {
                let bound = listener
                    .local_addr()
                    .map(|addr| addr.port())
                    .unwrap_or(port);
                drop(listener);
                debug!(port = bound, "allocated callback port");
                return Ok(bound);
            }
            Err(e) => {
                debug!(port, error = %e, "callback port unavailable, trying next");
            }
        }
    }
    Err(Error::NoAvailablePort(candidates.to_vec()))
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Two distinct free ports, found by letting the OS pick.
    fn two_free_ports() -> (u16, u16) {
        let a = TcpListener::bind("127.0.0.1:0").unwrap();
        let b = TcpListener::bind("127.0.0.1:0").unwrap();
        (a.local_addr().unwrap().port(), b.local_addr().unwrap().port())
    }

    #[test]
    fn skips_bound_port() {
        let (busy, free) = two_free_ports();
        let _holder = TcpListener::bind((Ipv4Addr::LOCALHOST, busy)).unwrap();

        assert_eq!(allocate(&[busy, free]).unwrap(), free);
    }

    #[test]
    fn returns_first_free_candidate_in_order() {
        let (first, second) = two_free_ports();
        assert_eq!(allocate(&[first, second]).unwrap(), first);
    }

    #[test]
    fn all_bound_is_no_available_port() {
        let a = TcpListener::bind("127.0.0.1:0").unwrap();
        let b = TcpListener::bind("127.0.0.1:0").unwrap();
        let ports = [a.local_addr().unwrap().port(), b.local_addr().unwrap().port()];

        let err = allocate(&ports).unwrap_err();
        assert!(matches!(err, Error::NoAvailablePort(ref c) if c == &ports));
    }

    #[test]
    fn empty_candidates_is_no_available_port() {
        assert!(matches!(allocate(&[]), Err(Error::NoAvailablePort(_))));
    }

    #[test]
    fn allocated_port_is_released() {
        let port = allocate(&[0]).unwrap();
        assert_ne!(port, 0);
        TcpListener::bind((Ipv4Addr::LOCALHOST, port)).expect("port must be free after allocate");
    }

    #[test]
    fn repeated_calls_return_same_port_when_state_unchanged() {
        let (port, _) = two_free_ports();
        assert_eq!(allocate(&[port]).unwrap(), port);
        assert_eq!(allocate(&[port]).unwrap(), port);
    }
}
