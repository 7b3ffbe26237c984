//! Serial port listing

use seqflash_serial::{enumerate_ports, select_device_port};

/// Print every serial port with its USB details
pub fn list_ports() -> Result<(), Box<dyn std::error::Error>> {
    let ports = enumerate_ports()?;

    println!("=== AVAILABLE SERIAL PORTS ===");
    if ports.is_empty() {
        println!("No serial ports found!");
        return Ok(());
    }

    for (i, port) in ports.iter().enumerate() {
        println!("{}. {}", i + 1, port.name);
        println!(
            "   Description: {}",
            port.description.as_deref().unwrap_or("n/a")
        );
        println!(
            "   Manufacturer: {}",
            port.manufacturer.as_deref().unwrap_or("n/a")
        );
        match port.vid_pid {
            Some((vid, pid)) => println!("   VID:PID: {:04X}:{:04X}", vid, pid),
            None => println!("   VID:PID: Unknown"),
        }
        println!();
    }

    match select_device_port(&ports) {
        Some(port) => println!("Auto-detect would use: {}", port.name),
        None => println!("Auto-detect found no likely device port"),
    }
    Ok(())
}
