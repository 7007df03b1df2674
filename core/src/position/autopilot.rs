use std::io::{self, Read, Write};
use std::net::{SocketAddr, UdpSocket};
use std::time::{Duration, Instant};

use serialport::SerialPort;

use super::mavlink::{self, Frame, FrameDecoder, Message};
use super::{Fix, FixTracker, PositionConfig, PositionError, PositionSource};
use crate::process::seconds;
use crate::telemetry::LogManager;

const GCS_SYSTEM_ID: u8 = 255;
const GCS_COMPONENT_ID: u8 = 190;
const POSITION_STREAM_HZ: u16 = 1;
const READ_SLICE: Duration = Duration::from_millis(50);

/// Byte channel to a flight controller.
pub trait TelemetryLink: Send {
    /// Reads whatever arrives within `timeout`; `Ok(0)` when nothing did.
    fn read_chunk(&mut self, buf: &mut [u8], timeout: Duration) -> io::Result<usize>;

    fn send(&mut self, bytes: &[u8]) -> io::Result<()>;
}

struct SerialLink {
    port: Box<dyn SerialPort>,
}

impl TelemetryLink for SerialLink {
    fn read_chunk(&mut self, buf: &mut [u8], timeout: Duration) -> io::Result<usize> {
        self.port.set_timeout(timeout.max(Duration::from_millis(1)))?;
        match self.port.read(buf) {
            Ok(n) => Ok(n),
            Err(err) if matches!(err.kind(), io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock) => {
                Ok(0)
            }
            Err(err) => Err(err),
        }
    }

    fn send(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.port.write_all(bytes)
    }
}

/// UDP endpoint; replies go to whoever sent the last datagram.
struct UdpLink {
    socket: UdpSocket,
    peer: Option<SocketAddr>,
}

impl TelemetryLink for UdpLink {
    fn read_chunk(&mut self, buf: &mut [u8], timeout: Duration) -> io::Result<usize> {
        self.socket
            .set_read_timeout(Some(timeout.max(Duration::from_millis(1))))?;
        match self.socket.recv_from(buf) {
            Ok((n, from)) => {
                self.peer = Some(from);
                Ok(n)
            }
            Err(err) if matches!(err.kind(), io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock) => {
                Ok(0)
            }
            Err(err) => Err(err),
        }
    }

    fn send(&mut self, bytes: &[u8]) -> io::Result<()> {
        match self.peer {
            Some(peer) => self.socket.send_to(bytes, peer).map(|_| ()),
            None => Ok(()),
        }
    }
}

fn open_link(config: &PositionConfig) -> Result<Box<dyn TelemetryLink>, PositionError> {
    if let Some(bind) = config.telemetry_link.strip_prefix("udp:") {
        let socket = UdpSocket::bind(bind)?;
        return Ok(Box::new(UdpLink { socket, peer: None }));
    }
    let port = serialport::new(&config.telemetry_link, config.telemetry_baud)
        .timeout(READ_SLICE)
        .open()?;
    Ok(Box::new(SerialLink { port }))
}

/// Flight-controller telemetry source speaking MAVLink.
///
/// Connecting waits for a heartbeat, remembers which vehicle sent it and
/// asks that vehicle to stream positions. Only GPS_RAW_INT with a 2D or
/// better fix becomes a candidate; VFR_HUD keeps the latest heading.
pub struct AutopilotLink {
    config: PositionConfig,
    link: Option<Box<dyn TelemetryLink>>,
    decoder: FrameDecoder,
    connected: bool,
    target: Option<(u8, u8)>,
    heading_deg: Option<f64>,
    sequence: u8,
    tracker: FixTracker,
    logger: LogManager,
}

impl AutopilotLink {
    pub fn new(config: PositionConfig, logger: &LogManager) -> Self {
        let logger = logger.child("autopilot");
        Self {
            tracker: FixTracker::new(config.min_satellites, logger.clone()),
            config,
            link: None,
            decoder: FrameDecoder::new(),
            connected: false,
            target: None,
            heading_deg: None,
            sequence: 0,
            logger,
        }
    }

    /// Uses an already-open channel instead of the configured one.
    pub fn with_link(config: PositionConfig, logger: &LogManager, link: Box<dyn TelemetryLink>) -> Self {
        let mut source = Self::new(config, logger);
        source.link = Some(link);
        source
    }

    /// Vehicle (system, component) that answered the connect heartbeat.
    pub fn target(&self) -> Option<(u8, u8)> {
        self.target
    }

    pub fn heading(&self) -> Option<f64> {
        self.heading_deg
    }

    /// Next verified frame within `budget`, `Ok(None)` on silence.
    fn next_frame(&mut self, budget: Duration) -> Result<Option<Frame>, PositionError> {
        let deadline = Instant::now() + budget;
        let mut chunk = [0u8; 512];
        loop {
            if let Some(frame) = self.decoder.next_frame() {
                return Ok(Some(frame?));
            }
            let now = Instant::now();
            if now >= deadline {
                return Ok(None);
            }
            let link = self.link.as_mut().ok_or(PositionError::NotConnected)?;
            let read = link.read_chunk(&mut chunk, (deadline - now).min(READ_SLICE))?;
            self.decoder.push(&chunk[..read]);
        }
    }

    /// Next decoded message; unknown message types come back as [`Message::Other`].
    pub fn next_message(&mut self, budget: Duration) -> Result<Option<Message>, PositionError> {
        match self.next_frame(budget)? {
            Some(frame) => Ok(Some(frame.message()?)),
            None => Ok(None),
        }
    }

    fn await_heartbeat(&mut self, timeout: Duration) -> Option<(u8, u8)> {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match self.next_frame(remaining) {
                Ok(Some(frame)) if frame.msgid == mavlink::MSG_HEARTBEAT => {
                    return Some((frame.system_id, frame.component_id));
                }
                Ok(_) => {}
                Err(err) if err.is_transient() => {
                    self.logger.debug(&format!("skipping frame: {}", err))
                }
                Err(err) => {
                    self.logger.error(&format!("telemetry read failed: {}", err));
                    return None;
                }
            }
        }
        None
    }

    fn request_position_stream(&mut self, (system, component): (u8, u8)) -> Result<(), PositionError> {
        let payload =
            mavlink::request_data_stream(system, component, mavlink::STREAM_POSITION, POSITION_STREAM_HZ);
        let frame = mavlink::encode_v1(
            self.sequence,
            GCS_SYSTEM_ID,
            GCS_COMPONENT_ID,
            mavlink::MSG_REQUEST_DATA_STREAM as u8,
            &payload,
        )
        .ok_or_else(|| PositionError::Payload("cannot encode stream request".to_string()))?;
        self.sequence = self.sequence.wrapping_add(1);
        let link = self.link.as_mut().ok_or(PositionError::NotConnected)?;
        link.send(&frame)?;
        Ok(())
    }
}

impl PositionSource for AutopilotLink {
    fn backend(&self) -> &'static str {
        "autopilot"
    }

    fn connect(&mut self) -> bool {
        if !self.config.enabled {
            self.logger.record("GPS is disabled in configuration");
            return false;
        }
        if self.connected {
            return true;
        }
        if self.link.is_none() {
            match open_link(&self.config) {
                Ok(link) => self.link = Some(link),
                Err(err) => {
                    self.logger.error(&format!(
                        "cannot open telemetry link {}: {}",
                        self.config.telemetry_link, err
                    ));
                    return false;
                }
            }
        }

        let timeout = seconds(self.config.heartbeat_timeout_s);
        self.logger.record(&format!(
            "waiting for heartbeat on {} (timeout {:.0}s)",
            self.config.telemetry_link,
            timeout.as_secs_f64()
        ));
        let target = match self.await_heartbeat(timeout) {
            Some(target) => target,
            None => {
                self.logger.error("no heartbeat from the flight controller");
                self.link = None;
                return false;
            }
        };
        self.logger.record(&format!(
            "heartbeat from system {} component {}",
            target.0, target.1
        ));
        if let Err(err) = self.request_position_stream(target) {
            self.logger
                .warn(&format!("position stream request failed: {}", err));
        }
        self.target = Some(target);
        self.connected = true;
        true
    }

    fn disconnect(&mut self) {
        if self.connected {
            self.logger.record("telemetry link closed");
        }
        self.link = None;
        self.connected = false;
        self.target = None;
    }

    fn is_connected(&self) -> bool {
        self.connected
    }

    fn tracker(&self) -> &FixTracker {
        &self.tracker
    }

    fn tracker_mut(&mut self) -> &mut FixTracker {
        &mut self.tracker
    }

    fn logger(&self) -> &LogManager {
        &self.logger
    }

    fn poll_candidate(&mut self, budget: Duration) -> Result<Option<Fix>, PositionError> {
        if !self.connected {
            return Err(PositionError::NotConnected);
        }
        let deadline = Instant::now() + budget;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            let message = match self.next_message(remaining)? {
                Some(message) => message,
                None => return Ok(None),
            };
            match message {
                Message::VfrHud(hud) => self.heading_deg = Some(f64::from(hud.heading)),
                Message::GpsRawInt(gps) if gps.has_fix() => {
                    let fix = Fix::new(
                        gps.latitude(),
                        gps.longitude(),
                        gps.altitude_m(),
                        gps.satellites_visible,
                    );
                    let heading = if self.config.read_heading {
                        self.heading_deg
                    } else {
                        None
                    };
                    return Ok(Some(fix.with_heading(heading)));
                }
                _ => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::position::mavlink::tests::{gps_payload, hud_payload};
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};

    struct ScriptedLink {
        chunks: VecDeque<Vec<u8>>,
        sent: Arc<Mutex<Vec<Vec<u8>>>>,
    }

    impl TelemetryLink for ScriptedLink {
        fn read_chunk(&mut self, buf: &mut [u8], timeout: Duration) -> io::Result<usize> {
            match self.chunks.pop_front() {
                Some(chunk) => {
                    buf[..chunk.len()].copy_from_slice(&chunk);
                    Ok(chunk.len())
                }
                None => {
                    std::thread::sleep(timeout.min(Duration::from_millis(5)));
                    Ok(0)
                }
            }
        }

        fn send(&mut self, bytes: &[u8]) -> io::Result<()> {
            self.sent.lock().unwrap().push(bytes.to_vec());
            Ok(())
        }
    }

    fn frame(msgid: u32, payload: &[u8]) -> Vec<u8> {
        mavlink::encode_v1(0, 1, 1, msgid as u8, payload).unwrap()
    }

    fn heartbeat() -> Vec<u8> {
        frame(mavlink::MSG_HEARTBEAT, &[0; 9])
    }

    fn link_with(
        chunks: Vec<Vec<u8>>,
        read_heading: bool,
    ) -> (AutopilotLink, Arc<Mutex<Vec<Vec<u8>>>>) {
        let sent = Arc::new(Mutex::new(Vec::new()));
        let config = PositionConfig {
            heartbeat_timeout_s: 1.0,
            read_heading,
            ..Default::default()
        };
        let link = ScriptedLink {
            chunks: chunks.into(),
            sent: sent.clone(),
        };
        (
            AutopilotLink::with_link(config, &LogManager::new("test"), Box::new(link)),
            sent,
        )
    }

    #[test]
    fn connect_requests_position_stream() {
        let (mut source, sent) = link_with(vec![heartbeat()], false);
        assert!(source.connect());
        assert_eq!(source.target(), Some((1, 1)));
        let sent = sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        let mut decoder = FrameDecoder::new();
        decoder.push(&sent[0]);
        let request = decoder.next_frame().unwrap().unwrap();
        assert_eq!(request.msgid, mavlink::MSG_REQUEST_DATA_STREAM);
        assert_eq!(request.payload[4], mavlink::STREAM_POSITION);
    }

    #[test]
    fn connect_fails_without_heartbeat() {
        let (mut source, _) = link_with(vec![], false);
        assert!(!source.connect());
        assert!(!source.is_connected());
    }

    #[test]
    fn only_real_fixes_become_positions() {
        let (mut source, _) = link_with(
            vec![
                heartbeat(),
                frame(mavlink::MSG_GPS_RAW_INT, &gps_payload(286_139_000, 772_090_000, 0, 1, 9)),
                frame(mavlink::MSG_VFR_HUD, &hud_payload(90)),
                frame(mavlink::MSG_GPS_RAW_INT, &gps_payload(286_139_000, 772_090_000, 10_000, 3, 9)),
            ],
            true,
        );
        assert!(source.connect());
        let fix = source.read_position(Duration::from_secs(1)).unwrap();
        assert_eq!(fix.altitude_m, Some(10.0));
        assert_eq!(fix.heading_deg, Some(90.0));
        assert_eq!(fix.satellites, 9);
    }

    #[test]
    fn heading_ignored_unless_requested() {
        let (mut source, _) = link_with(
            vec![
                heartbeat(),
                frame(mavlink::MSG_VFR_HUD, &hud_payload(180)),
                frame(mavlink::MSG_GPS_RAW_INT, &gps_payload(286_139_000, 772_090_000, 0, 2, 6)),
            ],
            false,
        );
        assert!(source.connect());
        let fix = source.read_position(Duration::from_secs(1)).unwrap();
        assert_eq!(fix.heading_deg, None);
        assert_eq!(fix.altitude_m, None);
        assert_eq!(source.heading(), Some(180.0));
    }

    #[test]
    fn silence_returns_cached_fix() {
        let (mut source, _) = link_with(
            vec![
                heartbeat(),
                frame(mavlink::MSG_GPS_RAW_INT, &gps_payload(286_139_000, 772_090_000, 0, 3, 8)),
            ],
            false,
        );
        assert!(source.connect());
        let first = source.wait_for_fix(Duration::from_secs(1)).unwrap();
        let again = source.read_position(Duration::from_millis(50)).unwrap();
        assert_eq!(first, again);
        source.disconnect();
        source.disconnect();
        assert!(!source.is_connected());
    }

    #[test]
    fn udp_link_remembers_peer() {
        let mut link = UdpLink {
            socket: UdpSocket::bind("127.0.0.1:0").unwrap(),
            peer: None,
        };
        let address = link.socket.local_addr().unwrap();
        let vehicle = UdpSocket::bind("127.0.0.1:0").unwrap();
        vehicle.send_to(&heartbeat(), address).unwrap();

        let mut buf = [0u8; 64];
        let n = link.read_chunk(&mut buf, Duration::from_secs(1)).unwrap();
        assert_eq!(&buf[..n], heartbeat().as_slice());
        link.send(b"ack").unwrap();
        vehicle
            .set_read_timeout(Some(Duration::from_secs(1)))
            .unwrap();
        let (n, _) = vehicle.recv_from(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"ack");
    }
}
