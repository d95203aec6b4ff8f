//! Serial port enumeration, filtered by USB vendor/product id.
//! The *filter rule* is core; the underlying OS port listing is the external
//! collaborator.
use shared::model::DeviceInfo;

/// Known Grid device vid/pid pairs.
pub const KNOWN_VID_PIDS: &[(u16, u16)] = &[
    (0x03EB, 0xECAC),
    (0x03EB, 0xECAD),
    (0x303A, 0x8123),
    (0x303A, 0x8124),
];

/// The external collaborator: lists serial ports visible to the OS.
pub trait PortEnumerator {
    fn list_ports(&self) -> Result<Vec<RawPort>, String>;
}

#[derive(Debug, Clone)]
pub struct RawPort {
    pub path: String,
    pub vendor_id: Option<u16>,
    pub product_id: Option<u16>,
    pub product_name: Option<String>,
    pub serial_number: Option<String>,
}

/// Lists ports via `tokio_serial` and applies the vid/pid filter. This is
/// the one real implementation of [`PortEnumerator`]; it is intentionally
/// thin, since the port-listing syscall itself is the external part of the
/// contract.
pub struct SystemPortEnumerator;

impl PortEnumerator for SystemPortEnumerator {
    fn list_ports(&self) -> Result<Vec<RawPort>, String> {
        let ports = tokio_serial::available_ports().map_err(|e| e.to_string())?;
        Ok(ports
            .into_iter()
            .filter_map(|port| match port.port_type {
                tokio_serial::SerialPortType::UsbPort(info) => Some(RawPort {
                    path: port.port_name,
                    vendor_id: Some(info.vid),
                    product_id: Some(info.pid),
                    product_name: info.product,
                    serial_number: info.serial_number,
                }),
                _ => None,
            })
            .collect())
    }
}

fn normalize_serial(serial: Option<String>) -> Option<String> {
    serial.map(|s| s.trim().to_uppercase())
}

/// Lists connected Grid devices, backing the CLI `devices` command.
pub fn discover_devices(enumerator: &dyn PortEnumerator) -> Result<Vec<DeviceInfo>, String> {
    let ports = enumerator.list_ports()?;
    Ok(ports
        .into_iter()
        .filter_map(|port| {
            let vid = port.vendor_id?;
            let pid = port.product_id?;
            KNOWN_VID_PIDS
                .contains(&(vid, pid))
                .then(|| DeviceInfo {
                    path: port.path,
                    vendor_id: vid,
                    product_id: pid,
                    product_name: port.product_name,
                    serial_number: normalize_serial(port.serial_number),
                })
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FakeEnumerator(Vec<RawPort>);

    impl PortEnumerator for FakeEnumerator {
        fn list_ports(&self) -> Result<Vec<RawPort>, String> {
            Ok(self.0.clone())
        }
    }

    #[test]
    fn filters_out_non_grid_vid_pids() {
        let enumerator = FakeEnumerator(vec![
            RawPort {
                path: "/dev/ttyGrid0".to_string(),
                vendor_id: Some(0x03EB),
                product_id: Some(0xECAC),
                product_name: Some("Grid Module".to_string()),
                serial_number: Some("  ab12cd  ".to_string()),
            },
            RawPort {
                path: "/dev/ttyUSB0".to_string(),
                vendor_id: Some(0x0483),
                product_id: Some(0x5740),
                product_name: None,
                serial_number: None,
            },
        ]);

        let devices = discover_devices(&enumerator).unwrap();
        assert_eq!(devices.len(), 1);
        assert_eq!(devices[0].serial_number.as_deref(), Some("AB12CD"));
    }
}
