//! Reads a simulated `OPT3001` through the reader/processor pipeline and
//! reports the light condition of every reading.

mod sim;

use std::cell::Cell;
use std::error::Error;

use clap::Parser;

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::{Receiver, Sender};

use embassy_time::{Delay, Duration, with_timeout};

use embedded_hal::i2c::ErrorKind;

use embedded_hal_async::delay::DelayNs;

use sensa_drivers::opt3001::{Address, Opt3001, Opt3001Error, RawResult, Reading};
use sensa_drivers::pipeline::{
    DEFAULT_QUEUE_CAPACITY, DEFAULT_READ_PERIOD_MS, DEFAULT_SEND_TIMEOUT_MS, HIGH_LIGHT_LUX,
    LOW_LIGHT_LUX, LightCondition, Produced, ReadingQueue, consume, produce,
};

use tracing::{Level, info, warn};

use sim::{SimulatedOpt3001, encode};

type Sensor = Opt3001<CriticalSectionRawMutex, SimulatedOpt3001>;
type Queue = ReadingQueue<CriticalSectionRawMutex, DEFAULT_QUEUE_CAPACITY>;

// How long the processor waits for a reading before checking whether the
// reader is done.
const IDLE_POLL: Duration = Duration::from_millis(100);

#[derive(Parser)]
#[command(
    name = "light-monitor",
    about = "Monitor a simulated OPT3001 ambient light sensor"
)]
struct Args {
    /// Number of readings to take
    #[arg(long, default_value_t = 10)]
    readings: usize,

    /// Interval between two readings, in milliseconds
    #[arg(long, default_value_t = DEFAULT_READ_PERIOD_MS)]
    period_ms: u32,

    /// Trigger every conversion explicitly instead of converting continuously
    #[arg(long)]
    single_shot: bool,

    /// Maximum wait for a free queue slot, in milliseconds
    #[arg(long, default_value_t = DEFAULT_SEND_TIMEOUT_MS)]
    queue_timeout_ms: u64,

    /// Maximum wait for a single-shot conversion, in milliseconds
    #[arg(long, default_value_t = 1000)]
    conversion_timeout_ms: u64,
}

#[derive(Debug, Default)]
struct ReaderStats {
    queued: usize,
    dropped: usize,
    failed: usize,
}

#[derive(Debug, Default)]
struct ProcessorStats {
    low: usize,
    normal: usize,
    high: usize,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn Error + Send + Sync>> {
    tracing_subscriber::fmt().with_max_level(Level::INFO).init();

    let args = Args::parse();

    let address = Address::Gnd;
    let mut sensor = Sensor::new(SimulatedOpt3001::new(address as u8), address);
    sensor.init().await?;

    sensor
        .write_low_limit(RawResult::from_bits(encode(LOW_LIGHT_LUX)))
        .await?;
    sensor
        .write_high_limit(RawResult::from_bits(encode(HIGH_LIGHT_LUX)))
        .await?;

    if args.single_shot {
        sensor.configure_single_shot().await?;
    } else {
        sensor.configure_continuous().await?;
    }
    info!(
        state = ?sensor.state(),
        config = %format!("{:#06X}", sensor.read_config().await?.bits()),
        "Sensor configured"
    );

    let queue = Queue::new();
    let reader_done = Cell::new(false);

    let reader = async {
        let stats = read_loop(&sensor, queue.sender(), &args).await;
        reader_done.set(true);
        stats
    };
    let processor = process_loop(queue.receiver(), &reader_done);

    let (reader_stats, processor_stats) = tokio::join!(reader, processor);
    let reader_stats = reader_stats?;

    info!(
        queued = reader_stats.queued,
        dropped = reader_stats.dropped,
        failed = reader_stats.failed,
        "Reader finished"
    );
    info!(
        low = processor_stats.low,
        normal = processor_stats.normal,
        high = processor_stats.high,
        "Processor finished"
    );

    sensor.deinit()?;

    Ok(())
}

async fn read_loop(
    sensor: &Sensor,
    sender: Sender<'_, CriticalSectionRawMutex, Reading, DEFAULT_QUEUE_CAPACITY>,
    args: &Args,
) -> Result<ReaderStats, Opt3001Error<ErrorKind>> {
    let mut delay = Delay;
    let send_timeout = Duration::from_millis(args.queue_timeout_ms);
    let conversion_timeout = Duration::from_millis(args.conversion_timeout_ms);
    let mut stats = ReaderStats::default();

    for _ in 0..args.readings {
        if args.single_shot {
            sensor.start_single_measurement().await?;
            sensor
                .wait_for_conversion(&mut delay, conversion_timeout)
                .await?;
        }

        match produce(sensor, sender, send_timeout).await {
            Ok(Produced::Queued(_)) => stats.queued += 1,
            Ok(Produced::Dropped(_)) => stats.dropped += 1,
            Err(e) => {
                warn!("Reading skipped: {e}");
                stats.failed += 1;
            }
        }

        delay.delay_ms(args.period_ms).await;
    }

    Ok(stats)
}

async fn process_loop(
    receiver: Receiver<'_, CriticalSectionRawMutex, Reading, DEFAULT_QUEUE_CAPACITY>,
    reader_done: &Cell<bool>,
) -> ProcessorStats {
    let mut stats = ProcessorStats::default();

    loop {
        match with_timeout(IDLE_POLL, consume(receiver)).await {
            Ok((_, LightCondition::Low)) => stats.low += 1,
            Ok((_, LightCondition::Normal)) => stats.normal += 1,
            Ok((_, LightCondition::High)) => stats.high += 1,
            Err(_) if reader_done.get() => return stats,
            Err(_) => {}
        }
    }
}
