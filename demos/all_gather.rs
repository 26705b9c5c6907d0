use std::net::{IpAddr, UdpSocket};
use std::time::Duration;

use anyhow::anyhow;
use bytes::Bytes;
use clap::Parser;
use clap_derive::Parser;
use peercomm::communicator::communicator::Communicator;
use peercomm::communicator::config::{CommunicatorConfig, NodeIdentity};
use peercomm::messaging::connection_info::IpAddress;
use tracing::{info, Level};

/// Runs several communicator instances on this machine, and lets them all-gather their names
#[derive(Parser)]
struct Args {
    #[clap(long, default_value_t = 4)]
    instances: usize,

    #[clap(long, default_value = "127.0.0.1")]
    ip: String,

    #[clap(long, default_value_t = 30)]
    timeout_seconds: u64,

    #[clap(short, long, default_value_t = false)]
    verbose: bool,

    #[clap(long, default_value_t = false)]
    very_verbose: bool,
}

fn free_udp_port() -> anyhow::Result<u16> {
    Ok(UdpSocket::bind("127.0.0.1:0")?.local_addr()?.port())
}

#[tokio::main]
pub async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let level = match (args.verbose, args.very_verbose) {
        (_, true) => Level::TRACE,
        (true, _) => Level::DEBUG,
        (false, false) => Level::INFO,
    };

    tracing_subscriber::fmt()
        .with_max_level(level)
        .try_init()
        .ok();

    if args.instances == 0 {
        return Err(anyhow!("at least one instance is required"));
    }

    let ip: IpAddr = args.ip.parse()?;
    let mut config = CommunicatorConfig::new(ip, free_udp_port()?, free_udp_port()?, args.instances, "demo");
    config.discovery_timeout = Duration::from_secs(args.timeout_seconds);
    config.collective_timeout = Duration::from_secs(args.timeout_seconds);
    let group_identifier = config.group_identifier("1", "1");

    let mut handles = Vec::new();
    for instance_id in 0..args.instances {
        let config = config.clone();
        let group_identifier = group_identifier.clone();
        let node_identity = NodeIdentity {
            node_name: "demo".to_string(),
            node_ip: IpAddress::new(ip),
            instance_id,
            number_of_nodes: 1,
        };

        handles.push(tokio::spawn(async move {
            let mut communicator = Communicator::new(config, node_identity, &group_identifier).await?;
            let result = communicator.all_gather(Bytes::from(format!("instance #{}", instance_id))).await?;
            communicator.close().await?;
            Ok::<_, anyhow::Error>(result)
        }));
    }

    for (instance_id, handle) in handles.into_iter().enumerate() {
        let values = handle.await??;
        let values = values.iter()
            .map(|v| String::from_utf8_lossy(v).to_string())
            .collect::<Vec<_>>();
        info!("instance #{} gathered {:?}", instance_id, values);
    }
    Ok(())
}
