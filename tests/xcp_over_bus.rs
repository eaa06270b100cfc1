//! End-to-end test: an XCP master driving a scripted slave ECU across a
//! simulated CAN bus, exercised purely through the public API.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;

use canharness::xcp::{command, pid};
use canharness::{
    BusConfig, CanBus, CanFrame, CanXcpTransport, DbcLibrary, Packet, SimDevice, Timestamp,
    XcpCanConfig, XcpMaster,
};

/// A minimal slave ECU: 32 bytes of calibration memory, an MTA pointer, and
/// responses shaped like the master expects them.
struct SlaveEcu {
    memory: [u8; 32],
    mta: usize,
    max_payload: usize,
}

impl SlaveEcu {
    fn new() -> Self {
        let mut memory = [0u8; 32];
        for (i, byte) in memory.iter_mut().enumerate() {
            *byte = 0xC0 + i as u8;
        }
        Self { memory, mta: 0, max_payload: 7 }
    }

    fn handle(&mut self, cmd: &Packet) -> Vec<Packet> {
        match cmd.packet_id() {
            command::CONNECT => {
                vec![Packet::from_bytes(&[pid::RES, 0x00, 0x08, 0x00, 0x08, 0x01, 0x01, 0x00]).unwrap()]
            }
            command::DISCONNECT => vec![Packet::command(pid::RES)],
            command::SET_MTA => {
                let bytes = cmd.bytes();
                self.mta = u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]) as usize;
                vec![Packet::command(pid::RES)]
            }
            command::DOWNLOAD => {
                let bytes = cmd.bytes();
                let len = usize::from(bytes[1]);
                let end = (self.mta + len).min(self.memory.len());
                let copied = end - self.mta;
                self.memory[self.mta..end].copy_from_slice(&bytes[2..2 + copied]);
                self.mta = end;
                vec![Packet::command(pid::RES)]
            }
            command::UPLOAD => {
                let requested = usize::from(cmd.bytes()[1]);
                let end = (self.mta + requested).min(self.memory.len());
                let mut responses = Vec::new();
                let mut cursor = self.mta;
                while cursor < end {
                    let chunk = (end - cursor).min(self.max_payload);
                    let mut bytes = vec![pid::RES];
                    bytes.extend_from_slice(&self.memory[cursor..cursor + chunk]);
                    responses.push(Packet::from_bytes(&bytes).unwrap());
                    cursor += chunk;
                }
                self.mta = end;
                responses
            }
            _ => vec![Packet::from_bytes(&[pid::ERR, 0x20]).unwrap()],
        }
    }
}

fn spawn_slave(
    bus: &CanBus,
    mut wire: mpsc::UnboundedReceiver<CanFrame>,
    config: &XcpCanConfig,
) -> tokio::task::JoinHandle<()> {
    let handle = bus.handle();
    let slave_id = config.slave_id;
    tokio::spawn(async move {
        let mut ecu = SlaveEcu::new();
        while let Some(frame) = wire.recv().await {
            let Ok(cmd) = Packet::from_bytes(frame.payload()) else { continue };
            for response in ecu.handle(&cmd) {
                let frame = CanFrame::new(slave_id, response.bytes()).unwrap();
                handle.process_receive(Timestamp::now(), &frame);
            }
        }
    })
}

#[tokio::test]
async fn calibration_session_round_trip() {
    let bus = CanBus::new(Arc::new(DbcLibrary::new()), BusConfig::default());
    let (device, wire) = SimDevice::new("xcp-link");
    bus.attach_device(device);

    let config = XcpCanConfig { timeout_ms: 200, ..XcpCanConfig::default() };
    let _slave = spawn_slave(&bus, wire, &config);

    let transport = CanXcpTransport::attach(&bus, config);
    let mut master = XcpMaster::new(transport);

    // Connect and inspect the negotiated limits.
    let info = master.connect(0x00).await.unwrap();
    assert!(master.is_connected());
    assert_eq!(info.max_cto, 0x08);
    assert_eq!(info.max_dto, 0x0800);

    // Read the slave's seeded memory: 12 bytes from offset 4 arrive split
    // across two response packets and must reassemble in order.
    master.set_mta(4, 0).await.unwrap();
    let uploaded = master.upload(12).await.unwrap();
    let expected: Vec<u8> = (0xC4..=0xCF).collect();
    assert_eq!(uploaded, expected);

    // Write a patch and read it back.
    master.set_mta(8, 0).await.unwrap();
    master.download(&[0x11, 0x22, 0x33, 0x44]).await.unwrap();
    master.set_mta(8, 0).await.unwrap();
    let patched = master.upload(4).await.unwrap();
    assert_eq!(patched, vec![0x11, 0x22, 0x33, 0x44]);

    // Tear down; the session is gone.
    master.disconnect().await.unwrap();
    assert!(!master.is_connected());
    assert!(master.get_status().await.is_err());

    let counters = bus.counters();
    assert!(counters.sent >= 7, "expected the full command sequence, saw {counters:?}");
}

#[tokio::test]
async fn master_survives_a_dead_link() {
    // No slave task: every request must time out, and the master must stay
    // usable for a later attempt.
    let bus = CanBus::new(Arc::new(DbcLibrary::new()), BusConfig::default());
    let (device, _wire) = SimDevice::new("xcp-link");
    bus.attach_device(device);

    let config = XcpCanConfig { timeout_ms: 50, ..XcpCanConfig::default() };
    let transport = CanXcpTransport::attach(&bus, config);
    let mut master = XcpMaster::new(transport);

    let started = Timestamp::now();
    let err = master.connect(0x00).await.unwrap_err();
    assert!(err.is_timeout());
    assert!(!master.is_connected());
    // The timeout is enforced by the queue, with only scheduling slack on
    // top of the configured bound.
    assert!(started.elapsed() < Duration::from_millis(500));
}
