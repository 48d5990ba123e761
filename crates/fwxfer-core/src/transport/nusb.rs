//! nusb-based USB channel for bridge devices.

use std::io::{self, Read, Write};
use std::time::Duration;

use nusb::transfer::{Bulk, In, Out};
use nusb::{Interface, MaybeFuture, list_devices};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument};

use super::traits::{Transport, TransportError};

/// Which USB device and interface to talk to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsbDescriptor {
    pub vendor_id: u16,
    pub product_id: u16,
    #[serde(default)]
    pub interface: u8,
}

/// Bulk IN/OUT pair on a claimed interface.
pub struct NusbTransport {
    interface: Interface,
    in_endpoint: u8,
    out_endpoint: u8,
    descriptor: UsbDescriptor,
    connected: bool,
}

impl NusbTransport {
    #[instrument(
        level = "info",
        fields(
            vid = format!("{:04X}", desc.vendor_id),
            pid = format!("{:04X}", desc.product_id)
        )
    )]
    pub fn open(desc: &UsbDescriptor) -> Result<Self, TransportError> {
        let device_info = list_devices()
            .wait()
            .map_err(|e| TransportError::OpenFailed(e.to_string()))?
            .find(|d| d.vendor_id() == desc.vendor_id && d.product_id() == desc.product_id)
            .ok_or(TransportError::DeviceNotFound {
                vid: desc.vendor_id,
                pid: desc.product_id,
            })?;

        info!(
            vendor_id = %format!("{:04X}", desc.vendor_id),
            product_id = %format!("{:04X}", desc.product_id),
            "Found device"
        );

        let device = device_info
            .open()
            .wait()
            .map_err(|e| TransportError::OpenFailed(e.to_string()))?;

        let interface = device.claim_interface(desc.interface).wait().map_err(|e| {
            TransportError::ClaimInterfaceFailed {
                interface: desc.interface,
                message: e.to_string(),
            }
        })?;

        let mut in_endpoint: u8 = 0;
        let mut out_endpoint: u8 = 0;
        for config in device.configurations() {
            for iface in config.interfaces() {
                if iface.interface_number() != desc.interface {
                    continue;
                }
                for alt in iface.alt_settings() {
                    for ep in alt.endpoints() {
                        if ep.transfer_type() == nusb::descriptors::TransferType::Bulk {
                            if ep.direction() == nusb::transfer::Direction::In {
                                in_endpoint = ep.address();
                            } else {
                                out_endpoint = ep.address();
                            }
                        }
                    }
                }
            }
        }

        if in_endpoint == 0 {
            return Err(TransportError::EndpointNotFound {
                ep_type: "Bulk".into(),
                direction: "In".into(),
            });
        }
        if out_endpoint == 0 {
            return Err(TransportError::EndpointNotFound {
                ep_type: "Bulk".into(),
                direction: "Out".into(),
            });
        }

        info!(
            in_ep = %format!("0x{:02X}", in_endpoint),
            out_ep = %format!("0x{:02X}", out_endpoint),
            "Device opened"
        );

        Ok(Self {
            interface,
            in_endpoint,
            out_endpoint,
            descriptor: *desc,
            connected: true,
        })
    }

    pub fn descriptor(&self) -> &UsbDescriptor {
        &self.descriptor
    }

    fn send(&mut self, data: &[u8], timeout: Duration) -> Result<(), TransportError> {
        let ep = self
            .interface
            .endpoint::<Bulk, Out>(self.out_endpoint)
            .map_err(|e| TransportError::WriteFailed(e.to_string()))?;
        let mut writer = ep.writer(4096).with_write_timeout(timeout);
        writer
            .write_all(data)
            .and_then(|()| writer.flush())
            .map_err(|e| self.map_io(e, timeout, TransportError::WriteFailed))
    }

    fn receive(&mut self, len: usize, timeout: Duration) -> Result<Vec<u8>, TransportError> {
        let ep = self
            .interface
            .endpoint::<Bulk, In>(self.in_endpoint)
            .map_err(|e| TransportError::ReadFailed(e.to_string()))?;
        let mut reader = ep.reader(4096).with_read_timeout(timeout);
        let mut buf = vec![0u8; len];
        let mut filled = 0;
        while filled < len {
            match reader.read(&mut buf[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                // a short reply is for the engine to classify
                Err(e) if e.kind() == io::ErrorKind::TimedOut && filled > 0 => break,
                Err(e) => return Err(self.map_io(e, timeout, TransportError::ReadFailed)),
            }
        }
        buf.truncate(filled);
        Ok(buf)
    }

    fn map_io(
        &mut self,
        e: io::Error,
        timeout: Duration,
        other: fn(String) -> TransportError,
    ) -> TransportError {
        match e.kind() {
            io::ErrorKind::TimedOut => TransportError::Timeout {
                timeout_ms: timeout.as_millis() as u64,
            },
            io::ErrorKind::BrokenPipe | io::ErrorKind::NotConnected => {
                self.connected = false;
                TransportError::Disconnected
            }
            _ => other(e.to_string()),
        }
    }
}

impl Transport for NusbTransport {
    #[instrument(level = "trace", skip(self, request), fields(len = request.len()))]
    fn transact(
        &mut self,
        request: &[u8],
        expected_reply_len: usize,
        timeout: Duration,
    ) -> Result<Vec<u8>, TransportError> {
        if !self.connected {
            return Err(TransportError::Disconnected);
        }
        self.send(request, timeout)?;
        if expected_reply_len == 0 {
            return Ok(Vec::new());
        }
        let reply = self.receive(expected_reply_len, timeout)?;
        debug!(bytes_read = reply.len(), "Reply received");
        Ok(reply)
    }

    fn is_connected(&self) -> bool {
        self.connected
    }

    fn describe(&self) -> String {
        format!(
            "usb {:04X}:{:04X}",
            self.descriptor.vendor_id, self.descriptor.product_id
        )
    }
}

/// Open the USB channel named by `desc` as a boxed transport.
pub fn open_channel(desc: &UsbDescriptor) -> Result<Box<dyn Transport>, TransportError> {
    Ok(Box::new(NusbTransport::open(desc)?))
}
