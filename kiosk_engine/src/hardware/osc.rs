use std::net::{SocketAddr, ToSocketAddrs, UdpSocket};

use log::{info, warn};

use super::{CueOutput, HardwareError};

/// Sends OSC messages with a single int32 argument over UDP.
pub struct OscCues {
    socket: UdpSocket,
    target: SocketAddr,
}

impl OscCues {
    pub fn connect<A: ToSocketAddrs>(target: A) -> Result<Self, HardwareError> {
        let target = target
            .to_socket_addrs()?
            .next()
            .ok_or_else(|| HardwareError::Encode("OSC target resolved to no address".to_string()))?;
        let bind = if target.is_ipv4() { "0.0.0.0:0" } else { "[::]:0" };
        let socket = UdpSocket::bind(bind)?;
        info!("OSC ready on {target}");
        Ok(Self { socket, target })
    }

    pub fn target(&self) -> SocketAddr {
        self.target
    }
}

impl CueOutput for OscCues {
    fn send(&self, address: &str, value: i32) {
        let packet = match encode_int_message(address, value) {
            Ok(packet) => packet,
            Err(err) => {
                warn!("OSC cue dropped: {err}");
                return;
            }
        };
        match self.socket.send_to(&packet, self.target) {
            Ok(_) => info!("OSC {address} {value}"),
            Err(err) => warn!("OSC send to {} failed: {err}", self.target),
        }
    }
}

/// Encodes `address ,i value` as an OSC 1.0 message.
pub fn encode_int_message(address: &str, value: i32) -> Result<Vec<u8>, HardwareError> {
    if !address.starts_with('/') || address.contains('\0') {
        return Err(HardwareError::Encode(format!("OSC address {address:?}")));
    }
    let mut packet = Vec::with_capacity(address.len() + 12);
    push_padded(&mut packet, address.as_bytes());
    push_padded(&mut packet, b",i");
    packet.extend_from_slice(&value.to_be_bytes());
    Ok(packet)
}

// OSC strings are null terminated and padded to a four byte boundary.
fn push_padded(packet: &mut Vec<u8>, bytes: &[u8]) {
    packet.extend_from_slice(bytes);
    let padding = 4 - bytes.len() % 4;
    packet.extend(std::iter::repeat(0).take(padding));
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn karaoke_cue_matches_osc_layout() {
        let packet = encode_int_message("/karaoke", 1).unwrap();
        let mut expected = b"/karaoke\0\0\0\0,i\0\0".to_vec();
        expected.extend_from_slice(&1i32.to_be_bytes());
        assert_eq!(packet, expected);
        assert_eq!(packet.len() % 4, 0);
    }

    #[test]
    fn address_must_be_rooted() {
        assert!(matches!(
            encode_int_message("karaoke", 0),
            Err(HardwareError::Encode(_))
        ));
    }

    #[test]
    fn cue_reaches_a_local_listener() {
        let listener = UdpSocket::bind("127.0.0.1:0").unwrap();
        listener
            .set_read_timeout(Some(Duration::from_secs(2)))
            .unwrap();
        let cues = OscCues::connect(listener.local_addr().unwrap()).unwrap();
        cues.send("/karaoke", 0);

        let mut buf = [0u8; 64];
        let (len, _) = listener.recv_from(&mut buf).unwrap();
        assert_eq!(&buf[..len], encode_int_message("/karaoke", 0).unwrap().as_slice());
    }
}
