use anyhow::{bail, Result};
use std::env;
use std::{thread::sleep, time::Duration};
use thermostat_protocol::relay::set_relay;

// Manual relay poke for bench testing. Without an explicit state the
// relay is pulsed on for a second so a click is audible.
fn main() -> Result<()> {
    let args: Vec<String> = env::args().collect();
    if args.len() < 2 {
        bail!("Usage: host [1|0]");
    }
    if args.len() == 3 {
        let on = match args[2].as_str() {
            "1" => true,
            "0" => false,
            _ => bail!("Unknown state: {}", args[2]),
        };
        set_relay(args[1].as_str(), on)?;
        println!("Set {} -> {}", args[2], args[1]);
    } else {
        set_relay(args[1].as_str(), true)?;
        println!("Set on {}", args[1]);
        sleep(Duration::from_secs(1));
        set_relay(args[1].as_str(), false)?;
        println!("Set off {}", args[1]);
    }
    Ok(())
}
