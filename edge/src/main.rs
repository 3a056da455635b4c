use std::{io, time::Instant};

use clap::Parser;
use log::{error, info};

use edge::{EdgeClient, cli::Args};

fn benchmark(client: &EdgeClient, warmup: usize, iterations: usize) -> io::Result<()> {
    let bench = client.benchmark(warmup, iterations)?;
    info!(flops = bench.flops, warmup = warmup; "benchmarked the head");

    for elapsed in &bench.timings {
        println!("{} us {:.3} GFLOP/s", elapsed.as_micros(), bench.gflops(*elapsed));
    }

    let mean = bench.mean();
    println!(
        "mean {} us {:.3} GFLOP/s",
        mean.as_micros(),
        bench.gflops(mean)
    );

    Ok(())
}

fn main() -> io::Result<()> {
    env_logger::init();
    let args = Args::parse();

    let client = EdgeClient::from_config(args.config())?;
    if let Some(iterations) = args.benchmark {
        return benchmark(&client, args.warmup, iterations);
    }

    let images = args.images(&mut rand::rng())?;
    let addr = client.config().server_addr();
    info!(local = args.local; "classifying {} images", images.len());

    let mut failed = 0;
    for image in &images {
        let start = Instant::now();
        let res = if args.local {
            client.infer_local(image)
        } else {
            client.infer(image, &addr)
        };

        match res {
            Ok(res) => {
                info!(elapsed_ms = start.elapsed().as_millis() as u64; "{} done", image.display());
                println!("{}: {}", image.display(), res.label);
            }
            Err(e) => {
                error!("failed to classify {}: {e}", image.display());
                failed += 1;
            }
        }
    }

    if failed > 0 {
        return Err(io::Error::other(format!(
            "{failed} of {} images failed",
            images.len()
        )));
    }

    Ok(())
}
