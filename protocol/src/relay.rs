use anyhow::Result;
use protobuf::Message;
use std::net::UdpSocket;

use crate::protos::generated::telemetry::{RelayCommand, RelayState};

/// UDP port relay stations listen on.
pub const RELAY_PORT: u16 = 4210;

/// Fire-and-forget switch command. The relay echoes its state in its next
/// telemetry datagram; nothing here waits for confirmation.
pub fn set_relay(addr: &str, on: bool) -> Result<()> {
    let udp = UdpSocket::bind("0.0.0.0:0")?;
    let mut msg = RelayCommand::new();
    msg.set_state(if on { RelayState::ON } else { RelayState::OFF });
    let out_bytes: Vec<u8> = msg.write_to_bytes()?;
    udp.send_to(&out_bytes, format!("{}:{}", addr, RELAY_PORT))?;
    Ok(())
}
