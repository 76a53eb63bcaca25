use std::error::Error;
use std::process::ExitCode;

use clap::Parser;
use ds18b20_host::{Config, DS18B20_FAMILY_CODE, Ds18b20Host, PowerSupply, ReadoutResolution};
use embedded_hal::delay::DelayNs;
use onewire_bus::{
    ClaimedBus, RomId, SlotPool,
    sim::{SimDevice, SimulatedBus},
};
use rand::{Rng, SeedableRng, rngs::StdRng};

mod publish;

use publish::{LineSink, Publish};

/// Polls DS18B20 temperature sensors on simulated 1-Wire buses and publishes their readings
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Number of buses, each run by its own bus engine
    #[arg(short, long, default_value_t = 1)]
    buses: u8,
    /// Sensors attached to each bus
    #[arg(short, long, default_value_t = 3)]
    devices: usize,
    /// Seed for sensor serial numbers and temperatures
    #[arg(long)]
    seed: Option<u64>,
    /// Polling rounds, 0 to poll forever
    #[arg(short, long, default_value_t = 0)]
    rounds: u64,
    /// Pause between rounds in milliseconds
    #[arg(short, long, default_value_t = 1000)]
    interval_ms: u32,
    /// Topic prefix, readings go to <prefix>/<rom>
    #[arg(short, long, default_value = "sensors/temperature")]
    topic_prefix: String,
    /// Conversion resolution in bits
    #[arg(long, default_value_t = 12, value_parser = clap::value_parser!(u8).range(9..=12))]
    resolution: u8,
    /// Sensors draw power from the data line
    #[arg(long)]
    parasite: bool,
    /// Execution slots available to bus engines
    #[arg(long, default_value_t = SlotPool::MAX_SLOTS)]
    slots: u8,
}

/// One bus engine and the sensors found on it.
struct Station<'a> {
    engine: ClaimedBus<'a, SimulatedBus>,
    host: Ds18b20Host,
}

fn main() -> ExitCode {
    // Initialize the logger
    env_logger::init();
    // Parse command line arguments
    let args = Args::parse();
    match run(&args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            log::error!("{e}");
            ExitCode::FAILURE
        }
    }
}

fn run(args: &Args) -> Result<(), Box<dyn Error>> {
    let resolution =
        ReadoutResolution::from_bits(args.resolution).ok_or("resolution must be 9 to 12 bits")?;
    let mut rng = match args.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_os_rng(),
    };
    let pool = SlotPool::new(args.slots);
    let mut stations = Vec::with_capacity(args.buses as usize);
    for _ in 0..args.buses {
        let bus = simulated_bus(&mut rng, args.devices, args.parasite);
        stations.push(Station::start(&pool, bus, resolution, args.parasite)?);
    }

    let mut sink = LineSink::new(std::io::stdout().lock());
    let mut delay = linux_embedded_hal::Delay;
    let mut round = 0u64;
    while args.rounds == 0 || round < args.rounds {
        for station in stations.iter_mut() {
            station.host.request_readings(&mut station.engine)?;
        }
        let conversion_ms = stations
            .iter()
            .map(|s| s.host.conversion_time_ms())
            .max()
            .unwrap_or(0);
        delay.delay_ms(conversion_ms);
        let mut published = 0;
        for station in stations.iter_mut() {
            for reading in station.host.retrieve_readings(&mut station.engine)? {
                sink.publish(
                    &publish::topic(&args.topic_prefix, reading.rom),
                    &publish::payload(reading.celsius()),
                )?;
                published += 1;
            }
            drift(&mut station.engine, &mut rng);
        }
        log::info!("round {round}: {published} readings");
        round += 1;
        if args.rounds == 0 || round < args.rounds {
            delay.delay_ms(args.interval_ms);
        }
    }
    Ok(())
}

impl<'a> Station<'a> {
    /// Claims a slot for `bus`, enumerates its sensors and configures them.
    fn start(
        pool: &'a SlotPool,
        bus: SimulatedBus,
        resolution: ReadoutResolution,
        parasite: bool,
    ) -> Result<Self, Box<dyn Error>> {
        let mut engine = ClaimedBus::new(pool, bus)?;
        let mut host = Ds18b20Host::new(&mut engine)?;
        let supply = host.read_power_supply(&mut engine)?;
        let mut host =
            host.with_parasite_power(parasite || supply == Some(PowerSupply::Parasite));
        host.configure(
            &mut engine,
            Config {
                resolution,
                ..Default::default()
            },
        )?;
        log::info!(
            "bus engine on slot {}: {} sensors, {}-bit, {:?} power",
            engine.slot(),
            host.devices().len(),
            host.resolution().bits(),
            supply,
        );
        for device in host.devices() {
            log::debug!("  {}", device.rom());
        }
        Ok(Self { engine, host })
    }
}

/// A bus carrying `devices` sensors with random serial numbers, reading -10 to 50 °C.
fn simulated_bus(rng: &mut StdRng, devices: usize, parasite: bool) -> SimulatedBus {
    SimulatedBus::new(
        (0..devices)
            .map(|_| {
                SimDevice::new(RomId::with_crc(DS18B20_FAMILY_CODE, rng.random()))
                    .with_temperature(rng.random_range(-160i16..=800) as u16)
                    .with_parasite_power(parasite)
            })
            .collect(),
    )
}

/// Moves every simulated temperature by up to 1/4 °C.
fn drift(engine: &mut ClaimedBus<'_, SimulatedBus>, rng: &mut StdRng) {
    let roms: Vec<RomId> = engine.bus().devices().iter().map(|d| d.rom()).collect();
    for rom in roms {
        if let Some(device) = engine.bus_mut().device_mut(rom) {
            let raw = (device.temperature() as i16 + rng.random_range(-4i16..=4)).clamp(-880, 2000);
            device.set_temperature(raw as u16);
        }
    }
}
