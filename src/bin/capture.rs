use std::env;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::time::Duration;

use picodaq::{AcquisitionConfig, AnyDevice, Channel, ChannelConfiguration,
    TimeSeries, VoltageRange};

const FILENAME: &str = "capture.csv";

fn usage() -> ! {
    eprintln!("usage: picodaq-capture block [SAMPLES]");
    eprintln!("       picodaq-capture stream [SECONDS]");
    eprintln!("captures channel A at 10 kHz, 2 V range, into {}", FILENAME);
    std::process::exit(2);
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let mut args = env::args().skip(1);
    let mode = args.next().unwrap_or_else(|| "block".to_owned());
    let amount = match args.next() {
        Some(amount) => amount.parse().unwrap_or_else(|_| usage()),
        None => match mode.as_str() { "stream" => 5, _ => 10000 },
    };

    let series = AnyDevice::with(|device| {
        device.configure(&AcquisitionConfig {
            channels: [Some(ChannelConfiguration {
                range: VoltageRange::V2,
                ..Default::default()
            }), None],
            sample_rate: 10_000.0,
            oversample: 1,
            samples: if mode == "block" { amount as u32 } else { 1000 },
        })?;
        match mode.as_str() {
            "block" => device.capture_block(),
            "stream" => device.capture_streaming(Duration::from_secs(amount)),
            _ => usage(),
        }
    })?;

    save(&series)?;
    println!("captured {} samples spanning {:.3} s, saved to {}",
        series.len(), series.times.last().copied().unwrap_or(0.0), FILENAME);
    Ok(())
}

fn save(series: &TimeSeries) -> std::io::Result<()> {
    let mut output = BufWriter::new(File::create(FILENAME)?);
    writeln!(output, "time_s,channel_a_v")?;
    let volts = series.channel(Channel::A).unwrap_or(&[]);
    for (time, volts) in series.times.iter().zip(volts) {
        writeln!(output, "{},{}", time, volts)?;
    }
    output.flush()
}
