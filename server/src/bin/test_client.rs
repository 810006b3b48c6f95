use clap::Parser;
use fsd_shared::{build_packet, DEFAULT_PORT, DEFAULT_SERVER_NAME};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::time::{sleep, Duration};

/// Scripted pilot: logs in, files a plan and climbs out on a fixed heading
#[derive(Parser, Debug)]
#[clap(author, version, about)]
struct Args {
    #[clap(short = 'H', long, default_value = "127.0.0.1")]
    host: String,
    #[clap(short, long, default_value_t = DEFAULT_PORT)]
    port: u16,
    #[clap(short, long, default_value = "CES2352")]
    callsign: String,
    #[clap(long, default_value_t = 2352)]
    cid: i32,
    #[clap(long, default_value = "123456")]
    password: String,
    /// Number of position reports to send, one per second
    #[clap(short, long, default_value_t = 10)]
    updates: u32,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let server_addr = format!("{}:{}", args.host, args.port);

    println!("Connecting to {}", server_addr);
    let stream = TcpStream::connect(&server_addr).await?;
    let (reader, mut writer) = stream.into_split();

    // print everything the server sends
    let printer = tokio::spawn(async move {
        let mut lines = BufReader::new(reader).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => println!("<- {}", line),
                Ok(None) => {
                    println!("Server closed the connection");
                    break;
                }
                Err(e) => {
                    println!("Error reading from server: {}", e);
                    break;
                }
            }
        }
    });

    let cid = args.cid.to_string();
    let cs = args.callsign.as_str();
    let mut script = vec![
        build_packet("$ID", &[cs, DEFAULT_SERVER_NAME, "69d7", "test_client", "1", "0", &cid, "0"]),
        build_packet(
            "#AP",
            &[cs, DEFAULT_SERVER_NAME, &cid, &args.password, "1", "9", "16", "Test Client"],
        ),
        build_packet(
            "$FP",
            &[
                cs, DEFAULT_SERVER_NAME, "I", "B738", "450", "ZSSS", "1200", "0", "FL350",
                "ZBAA", "2", "30", "3", "45", "ZSPD", "", "PIKAS G330 PIMOL",
            ],
        ),
    ];

    for i in 0..args.updates {
        let latitude = format!("{:.5}", 31.1979 + f64::from(i) * 0.01);
        let altitude = (i * 500).to_string();
        script.push(build_packet(
            "@",
            &["N", cs, "7000", "1", &latitude, "121.3363", &altitude, "250", "0", "0"],
        ));
    }
    script.push(build_packet("#DP", &[cs, &cid]));

    for packet in script {
        print!("-> {}", packet);
        writer.write_all(packet.as_bytes()).await?;
        sleep(Duration::from_secs(1)).await;
    }

    writer.shutdown().await?;
    let _ = printer.await;
    Ok(())
}
