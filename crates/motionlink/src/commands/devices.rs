use tabled::{Table, Tabled};

use motionlink_device::{UsbIdFilter, discover_ports};

use crate::cli::GlobalOpts;
use crate::error::CliError;

#[derive(Tabled)]
struct DeviceRow {
    #[tabled(rename = "PORT")]
    port: String,
    #[tabled(rename = "SERIAL")]
    serial: String,
    #[tabled(rename = "USB ID")]
    usb_id: String,
}

pub fn handle(global: &GlobalOpts) -> Result<(), CliError> {
    let ports = discover_ports(&UsbIdFilter::default())?;

    if global.json {
        let entries: Vec<serde_json::Value> = ports
            .iter()
            .map(|p| {
                serde_json::json!({
                    "port": p.path,
                    "serial": p.serial_number,
                    "vendor_id": p.vendor_id,
                    "product_id": p.product_id,
                })
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&entries)?);
        return Ok(());
    }

    if ports.is_empty() {
        println!("No boards found.");
        return Ok(());
    }

    let rows: Vec<DeviceRow> = ports
        .into_iter()
        .map(|p| DeviceRow {
            port: p.path,
            serial: p.serial_number.unwrap_or_else(|| "-".into()),
            usb_id: format!("{:04x}:{:04x}", p.vendor_id, p.product_id),
        })
        .collect();
    println!("{}", Table::new(rows));
    Ok(())
}
