use anyhow::{bail, Result};
use protobuf::Message;
use std::net::{SocketAddr, UdpSocket};

use crate::protos::generated::telemetry::TelemetryMessage;

// Station reports are tiny; anything bigger is garbage.
const MAX_DATAGRAM: usize = 512;

pub trait ReportHandler {
    fn on_report(&mut self, src: SocketAddr, msg: TelemetryMessage) -> Result<()>;
}

pub struct TelemetryListener<'a> {
    handler: &'a mut dyn ReportHandler,
}

impl<'a> TelemetryListener<'a> {
    pub fn new(handler: &'a mut dyn ReportHandler) -> TelemetryListener<'a> {
        TelemetryListener { handler }
    }

    /// Receives report datagrams until the socket fails. Undecodable
    /// packets are logged and skipped, they never stop the loop.
    pub fn main_loop(&mut self, bind_addr: &str) -> Result<()> {
        let socket = UdpSocket::bind(bind_addr)?;
        log::info!("listening for telemetry on {}", bind_addr);

        loop {
            let mut buf = [0; MAX_DATAGRAM];
            let (sz, src) = socket.recv_from(&mut buf)?;

            if let Err(err) = self.dispatch(src, &buf[0..sz]) {
                log::warn!("{}: bad report: {:#}", src, err);
            }
        }
    }

    fn dispatch(&mut self, src: SocketAddr, buf: &[u8]) -> Result<()> {
        if buf.is_empty() {
            bail!("empty datagram");
        }

        let msg = TelemetryMessage::parse_from_bytes(buf)?;
        if msg.sensor.is_none() && msg.switch.is_none() && msg.relay.is_none() {
            bail!("datagram carries no report");
        }

        self.handler.on_report(src, msg)
    }
}
