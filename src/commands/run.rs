//! The provisioning loop

use chrono::Local;
use seqflash_core::config::StationConfig;
use seqflash_core::identity::RuleSet;
use seqflash_core::lifecycle::{Controller, RunEnd, RunSettings, StopSignal};
use seqflash_core::record::SessionSummary;
use seqflash_core::sink::{write_summary, CsvLedger, OutputPaths};
use seqflash_esptool::EspTool;
use seqflash_serial::{
    enumerate_ports, select_device_port, ResetTiming, SerialIdentityReader, SerialPortMonitor,
};

use super::progress::IndicatifObserver;
use super::{print_images, ResolvedImages};

/// Run options after CLI parsing
pub struct RunOptions {
    pub port: Option<String>,
    pub chip: String,
    pub baudrate: Option<u32>,
    pub erase: bool,
    pub verify: bool,
    pub timeout_secs: Option<u64>,
    pub output_base: Option<String>,
}

/// Provision devices until interrupted or a device is left plugged in
pub fn run_provisioning(
    mut config: StationConfig,
    images: ResolvedImages,
    options: RunOptions,
) -> Result<(), Box<dyn std::error::Error>> {
    // Flags win over the station file
    if let Some(baud) = options.baudrate {
        config.serial.baud = baud;
    }
    if let Some(secs) = options.timeout_secs {
        config.serial.read_timeout_secs = secs;
    }

    let rules = RuleSet::from_settings(&config.identity)?;
    let port = match options.port {
        Some(port) => port,
        None => auto_detect_port()?,
    };

    let paths = OutputPaths::new(options.output_base.as_deref(), Local::now());

    println!("=== ESP32 Sequential Flasher ===");
    println!("Port: {}", port);
    println!("Chip: {}", options.chip);
    println!("Baud rate: {}", config.serial.baud);
    println!("Erase before flashing: {}", if options.erase { "yes" } else { "no" });
    println!("Verify after flashing: {}", if options.verify { "yes" } else { "no" });
    print_images(&images);
    println!("Results CSV: {}", paths.ledger.display());
    println!("Results JSON: {}", paths.summary.display());
    println!("Press Ctrl+C to stop.");
    println!();

    let stop = StopSignal::new();
    let handler_stop = stop.clone();
    ctrlc::set_handler(move || {
        log::info!("Stop requested, finishing the current device...");
        handler_stop.request();
    })?;

    let settings = RunSettings {
        port: port.clone(),
        chip: options.chip,
        images: images.images,
        erase: options.erase,
        verify: options.verify,
        read_timeout: config.serial.read_timeout(),
        timing: config.timing.clone(),
    };
    let monitor = SerialPortMonitor::new(config.serial.baud);
    let programmer = EspTool::new(
        config.programmer.clone(),
        config.serial.baud,
        config.timing.tool_settle(),
    );
    let reader = SerialIdentityReader::new(
        config.serial.baud,
        rules,
        ResetTiming::from(&config.timing),
    );

    let mut controller = Controller::new(monitor, programmer, reader, settings)
        .with_stop_signal(stop)
        .with_observer(Box::new(IndicatifObserver::new()));
    let mut ledger = CsvLedger::new(&paths.ledger);
    let session = controller.run(&mut ledger);

    match session.end {
        RunEnd::Interrupted => println!("\nStopped by user."),
        RunEnd::RemovalTimeout => println!(
            "\nDevice was not removed within {}s. Stopping.",
            config.timing.removal_timeout().as_secs()
        ),
    }

    if !session.records.is_empty() {
        write_summary(&session.records, &paths.summary)?;
        println!("Results saved to {}", paths.summary.display());
    }
    print_tally(&SessionSummary::from_records(&session.records));
    Ok(())
}

fn auto_detect_port() -> Result<String, Box<dyn std::error::Error>> {
    let ports = enumerate_ports()?;
    match select_device_port(&ports) {
        Some(port) => {
            println!("Auto-detected port: {}", port);
            Ok(port.name.clone())
        }
        None => {
            let seen: Vec<&str> = ports.iter().map(|p| p.name.as_str()).collect();
            Err(format!(
                "No device port found (ports seen: {}). Use --port to select one.",
                if seen.is_empty() {
                    "none".to_string()
                } else {
                    seen.join(", ")
                }
            )
            .into())
        }
    }
}

fn print_tally(summary: &SessionSummary) {
    let rule = "=".repeat(60);
    println!();
    println!("{}", rule);
    println!("SEQUENTIAL FLASH OPERATION SUMMARY");
    println!("{}", rule);
    println!("Total devices processed: {}", summary.total);
    println!("Successful: {}", summary.successful);
    println!("Failed: {}", summary.failed);
    match summary.success_rate() {
        Some(rate) => println!("Success rate: {:.1}%", rate),
        None => println!("No devices processed"),
    }

    if !summary.provisioned.is_empty() {
        println!("\nSUCCESSFUL DEVICES:");
        for device in &summary.provisioned {
            println!(
                "  Device #{}: {} | Key: {}",
                device.device_number, device.serial_number, device.key_display
            );
        }
    }

    if !summary.failures.is_empty() {
        println!("\nFAILED DEVICES:");
        for device in &summary.failures {
            println!(
                "  Device #{}: {}",
                device.device_number,
                device.reasons.join(", ")
            );
        }
    }
}
