//! Programmer registration and dispatch
//!
//! A programmer is anything that implements [`ControlTransport`]: the USB
//! bridge, or the in-memory emulator for dry runs. Both take the same pin
//! and speed options.

use icenvcm_core::nvcm::{PinMap, SessionConfig};
use icenvcm_core::ControlTransport;

/// Information about a programmer
pub struct ProgrammerInfo {
    /// Primary name (used for matching)
    pub name: &'static str,
    /// Alternative names/aliases
    pub aliases: &'static [&'static str],
    /// Short description
    pub description: &'static str,
}

/// All programmers known to this build
pub fn available_programmers() -> Vec<ProgrammerInfo> {
    vec![
        ProgrammerInfo {
            name: "usb",
            aliases: &["bridge", "tp1"],
            description: "USB SPI/GPIO bridge (VID:cafe PID:4010) (index=<n>,speed=<MHz>,<pin>=<gpio>)",
        },
        ProgrammerInfo {
            name: "dummy",
            aliases: &["emulator"],
            description: "In-memory bridge and blank iCE40UP5K for dry runs",
        },
    ]
}

/// Generate help text listing all available programmers
pub fn programmer_help() -> String {
    let mut help = String::from("Available programmers:\n");
    for p in available_programmers() {
        help.push_str(&format!("  {:8} - {}\n", p.name, p.description));
    }
    help
}

/// Resolve a programmer name or alias
pub fn find_programmer(name: &str) -> Option<&'static str> {
    available_programmers()
        .into_iter()
        .find(|p| p.name == name || p.aliases.contains(&name))
        .map(|p| p.name)
}

/// An opened programmer with the wiring to use on it
pub struct Programmer<'a> {
    /// Control transport of the bridge
    pub control: &'a mut dyn ControlTransport,
    /// Pin assignment on the bridge
    pub pins: PinMap,
    /// NVCM session settings
    pub session: SessionConfig,
}

/// Execute a function with the specified programmer
///
/// The programmer string can be just the name (e.g., "usb") or include
/// parameters (e.g., "usb:index=1,speed=6").
pub fn with_programmer<F>(programmer: &str, f: F) -> Result<(), Box<dyn std::error::Error>>
where
    F: FnOnce(Programmer<'_>) -> Result<(), Box<dyn std::error::Error>>,
{
    let (name, options) = parse_programmer_string(programmer);

    let canonical_name = find_programmer(name).ok_or_else(|| unknown_programmer_error(name))?;

    // Both programmers understand the same wiring options
    let config = icenvcm_usb::parse_options(&options)
        .map_err(|e| format!("Invalid {} parameters: {}", canonical_name, e))?;

    match canonical_name {
        "usb" => {
            log::info!("Opening USB bridge...");
            let mut bridge = icenvcm_usb::UsbBridge::open_with_config(&config).map_err(|e| {
                format!(
                    "Failed to open bridge: {}\n\
                     Make sure the device is connected and you have permissions.",
                    e
                )
            })?;
            f(Programmer {
                control: &mut bridge,
                pins: config.pins,
                session: config.session,
            })
        }
        "dummy" => {
            let mut bridge = icenvcm_dummy::DummyBridge::new(config.pins);
            f(Programmer {
                control: &mut bridge,
                pins: config.pins,
                session: config.session,
            })
        }
        _ => Err(unknown_programmer_error(name)),
    }
}

/// Parse a programmer string into name and options
///
/// Format: "name" or "name:option1=value1,option2=value2"
pub fn parse_programmer_string(s: &str) -> (&str, Vec<(&str, &str)>) {
    if let Some((name, opts)) = s.split_once(':') {
        let options: Vec<_> = opts
            .split(',')
            .filter_map(|opt| opt.split_once('='))
            .collect();
        (name, options)
    } else {
        (s, Vec::new())
    }
}

fn unknown_programmer_error(name: &str) -> Box<dyn std::error::Error> {
    let mut msg = format!("Unknown programmer: {}\n\n", name);
    msg.push_str(&programmer_help());
    msg.into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_programmer_string() {
        assert_eq!(parse_programmer_string("usb"), ("usb", vec![]));
        assert_eq!(
            parse_programmer_string("usb:index=1,cs=5"),
            ("usb", vec![("index", "1"), ("cs", "5")])
        );
    }

    #[test]
    fn test_find_programmer() {
        assert_eq!(find_programmer("tp1"), Some("usb"));
        assert_eq!(find_programmer("dummy"), Some("dummy"));
        assert_eq!(find_programmer("ch341a"), None);
    }

    #[test]
    fn test_dummy_dispatch() {
        with_programmer("dummy:cs=5,speed=6", |p| {
            assert_eq!(p.pins.cs, 5);
            assert_eq!(p.session.clock_mhz, 6);
            Ok(())
        })
        .unwrap();
        assert!(with_programmer("nope", |_| Ok(())).is_err());
    }
}
