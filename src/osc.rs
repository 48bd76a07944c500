use std::net::{SocketAddr, UdpSocket};
use std::time::{SystemTime, UNIX_EPOCH};

use rosc::{encoder, OscBundle, OscMessage, OscPacket, OscTime, OscType};

use crate::accumulator::WatchData;
use crate::error::OscError;

// Seconds between the NTP epoch (1900) and the Unix epoch (1970).
const NTP_UNIX_OFFSET_SECS: u64 = 2_208_988_800;

fn get_timetag() -> Result<OscTime, OscError> {
    let since_unix = SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default();
    let seconds = since_unix.as_secs() + NTP_UNIX_OFFSET_SECS;

    if seconds > u64::from(u32::MAX) {
        return Err(OscError::TimeOutOfRange);
    }

    // 32-bit binary fraction of a second.
    let fractional = (u64::from(since_unix.subsec_nanos()) << 32) / 1_000_000_000;

    Ok(OscTime { seconds: seconds as u32, fractional: fractional as u32 })
}

/// Publishes telemetry snapshots as OSC bundles over UDP.
pub struct OscPublisher {
    socket: UdpSocket,
    hr_flip_flop: bool,
}

impl OscPublisher {
    pub fn new(addr: &SocketAddr) -> Result<Self, OscError> {
        let socket = UdpSocket::bind("0.0.0.0:0")?;
        socket.connect(addr)?;

        Ok(OscPublisher {
            socket,
            hr_flip_flop: false,
        })
    }

    pub fn publish(&mut self, data: &WatchData) -> Result<(), OscError> {
        let packet = self.build_packet(data)?;
        let bytes = encoder::encode(&packet)?;

        self.socket.send(&bytes)?;

        Ok(())
    }

    fn build_packet(&mut self, data: &WatchData) -> Result<OscPacket, OscError> {
        let message = |path: &str, value| {
            OscPacket::Message(OscMessage {
                addr: path.to_string(),
                args: vec![value],
            })
        };

        let mut content = vec![
            message("/avatar/parameters/isHRConnected", OscType::Bool(data.is_connected)),
            message("/telemetry/caloriesBurned", OscType::Float(data.calories_burned as f32)),
        ];

        if let Some(heart_rate) = data.heart_rate {
            self.hr_flip_flop = !self.hr_flip_flop;

            // Approximate RR interval, no RR data reaches the accumulator.
            let rr_interval_ms = if heart_rate > 0 { 60_000 / i32::from(heart_rate) } else { 0 };

            content.extend([
                message("/avatar/parameters/HR", OscType::Int(i32::from(heart_rate))),
                message("/avatar/parameters/onesHR", OscType::Int(i32::from(heart_rate % 10))),
                message("/avatar/parameters/tensHR", OscType::Int(i32::from(heart_rate % 100 / 10))),
                message("/avatar/parameters/hundredsHR", OscType::Int(i32::from(heart_rate / 100))),
                message("/avatar/parameters/floatHR", OscType::Float(f32::from(heart_rate) / 255.0 * 2.0 - 1.0)),
                message("/avatar/parameters/isHRBeat", OscType::Bool(true)),
                message("/avatar/parameters/HeartBeatToggle", OscType::Bool(self.hr_flip_flop)),
                message("/avatar/parameters/RRInterval", OscType::Int(rr_interval_ms)),
            ]);
        }

        Ok(OscPacket::Bundle(OscBundle {
            timetag: get_timetag()?,
            content,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addresses(packet: &OscPacket) -> Vec<String> {
        match packet {
            OscPacket::Bundle(bundle) => bundle
                .content
                .iter()
                .filter_map(|p| match p {
                    OscPacket::Message(m) => Some(m.addr.clone()),
                    OscPacket::Bundle(_) => None,
                })
                .collect(),
            OscPacket::Message(m) => vec![m.addr.clone()],
        }
    }

    fn find_arg(packet: &OscPacket, addr: &str) -> Option<OscType> {
        match packet {
            OscPacket::Bundle(bundle) => bundle.content.iter().find_map(|p| match p {
                OscPacket::Message(m) if m.addr == addr => m.args.first().cloned(),
                _ => None,
            }),
            OscPacket::Message(_) => None,
        }
    }

    #[test]
    fn test_streaming_packet_contents() {
        let target: SocketAddr = "127.0.0.1:9000".parse().unwrap();
        let mut publisher = OscPublisher::new(&target).unwrap();
        let data = WatchData {
            heart_rate: Some(142),
            calories_burned: 12.5,
            device_name: Some("Test Strap".into()),
            is_connected: true,
        };

        let packet = publisher.build_packet(&data).unwrap();
        assert_eq!(find_arg(&packet, "/avatar/parameters/HR"), Some(OscType::Int(142)));
        assert_eq!(find_arg(&packet, "/avatar/parameters/hundredsHR"), Some(OscType::Int(1)));
        assert_eq!(find_arg(&packet, "/avatar/parameters/tensHR"), Some(OscType::Int(4)));
        assert_eq!(find_arg(&packet, "/avatar/parameters/onesHR"), Some(OscType::Int(2)));
        assert_eq!(find_arg(&packet, "/avatar/parameters/RRInterval"), Some(OscType::Int(422)));
        assert_eq!(find_arg(&packet, "/telemetry/caloriesBurned"), Some(OscType::Float(12.5)));

        // Beat toggle flips on every published sample.
        assert_eq!(find_arg(&packet, "/avatar/parameters/HeartBeatToggle"), Some(OscType::Bool(true)));
        let packet = publisher.build_packet(&data).unwrap();
        assert_eq!(find_arg(&packet, "/avatar/parameters/HeartBeatToggle"), Some(OscType::Bool(false)));
    }

    #[test]
    fn test_disconnected_packet_has_no_heart_rate() {
        let target: SocketAddr = "127.0.0.1:9000".parse().unwrap();
        let mut publisher = OscPublisher::new(&target).unwrap();
        let data = WatchData {
            heart_rate: None,
            calories_burned: 3.0,
            device_name: None,
            is_connected: false,
        };

        let packet = publisher.build_packet(&data).unwrap();
        let addrs = addresses(&packet);
        assert!(!addrs.iter().any(|a| a == "/avatar/parameters/HR"));
        assert_eq!(find_arg(&packet, "/avatar/parameters/isHRConnected"), Some(OscType::Bool(false)));
    }

    #[test]
    fn test_publish_reaches_socket() {
        let listener = UdpSocket::bind("127.0.0.1:0").unwrap();
        let target = listener.local_addr().unwrap();
        let mut publisher = OscPublisher::new(&target).unwrap();

        publisher
            .publish(&WatchData { heart_rate: Some(90), calories_burned: 1.0, device_name: None, is_connected: true })
            .unwrap();

        let mut buf = [0u8; rosc::decoder::MTU];
        let len = listener.recv(&mut buf).unwrap();
        let (_, packet) = rosc::decoder::decode_udp(&buf[..len]).unwrap();
        assert_eq!(find_arg(&packet, "/avatar/parameters/HR"), Some(OscType::Int(90)));
    }
}
