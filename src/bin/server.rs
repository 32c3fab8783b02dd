//! UDPX 수신 서버
//!
//! 아이템을 받아 디렉터리에 저장하고, 해시 조회에 응답한다.
//!
//! 사용법:
//!   cargo run --release --bin udpx-recv -- [OPTIONS]
//!
//! 예시:
//!   # 기본 수신 (키 자동 생성, 출력된 키를 송신측에 전달)
//!   cargo run --release --bin udpx-recv -- --bind 0.0.0.0:9000 --dir ./received
//!
//!   # 공유 키 + AES-256-GCM
//!   cargo run --release --bin udpx-recv -- -k <64 hex> --cipher aes

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use udpx::crypto::{generate_key, parse_hex_key};
use udpx::{Config, DirStore, LossyTransport, Pipeline, Receiver, Transport, UdpTransport};

/// 서버 설정
struct ServerConfig {
    bind_addr: SocketAddr,
    dir: PathBuf,
    key: Option<String>,
    cipher: String,
    compressor: String,
    drop_rate: f64,
    verbose: bool,
    config: Config,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:9000".parse().unwrap(),
            dir: PathBuf::from("received"),
            key: None,
            cipher: "chacha".into(),
            compressor: "zlib".into(),
            drop_rate: 0.0,
            verbose: false,
            config: Config::default(),
        }
    }
}

fn parse_args() -> ServerConfig {
    let args: Vec<String> = std::env::args().collect();
    let mut config = ServerConfig::default();

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--bind" | "-b" => {
                if i + 1 < args.len() {
                    config.bind_addr = args[i + 1].parse().expect("유효한 주소 필요");
                    i += 1;
                }
            }
            "--dir" | "-d" => {
                if i + 1 < args.len() {
                    config.dir = PathBuf::from(&args[i + 1]);
                    i += 1;
                }
            }
            "--key" | "-k" => {
                if i + 1 < args.len() {
                    config.key = Some(args[i + 1].clone());
                    i += 1;
                }
            }
            "--cipher" => {
                if i + 1 < args.len() {
                    config.cipher = args[i + 1].clone();
                    i += 1;
                }
            }
            "--compress" => {
                if i + 1 < args.len() {
                    config.compressor = args[i + 1].clone();
                    i += 1;
                }
            }
            "--preset" => {
                if i + 1 < args.len() {
                    config.config = match args[i + 1].as_str() {
                        "lan" => Config::lan(),
                        "unstable" => Config::unstable_network(),
                        _ => Config::default(),
                    };
                    i += 1;
                }
            }
            "--packet-size" => {
                if i + 1 < args.len() {
                    config.config.packet_size = args[i + 1].parse().expect("유효한 숫자 필요");
                    i += 1;
                }
            }
            "--reply-timeout" => {
                if i + 1 < args.len() {
                    config.config.reply_timeout_ms = args[i + 1].parse().expect("유효한 숫자 필요");
                    i += 1;
                }
            }
            "--drop-rate" => {
                if i + 1 < args.len() {
                    config.drop_rate = args[i + 1].parse().expect("유효한 숫자 필요");
                    i += 1;
                }
            }
            "--verbose" | "-v" => {
                config.verbose = true;
                config.config.verbose_receive = true;
            }
            "--help" | "-h" => {
                println!(
                    r#"UDPX Receiver - 암호화/압축 아이템 수신 서버

조각별 확인 + 아이템 해시 검증 기반 전송 프로토콜 수신측
- 아이템마다 파일 하나로 저장 (파일 이름 = 아이템 이름 hex)
- 해시 조회 응답으로 송신측 중복 전송 방지

사용법:
  cargo run --release --bin udpx-recv -- [OPTIONS]

옵션:
  -b, --bind <ADDR>         바인드 주소 (기본: 0.0.0.0:9000)
  -d, --dir <PATH>          저장 디렉터리 (기본: ./received)
  -k, --key <HEX>           공유 키 64자 hex (없으면 생성 후 출력)
  --cipher <NAME>           chacha | aes (기본: chacha)
  --compress <NAME>         zlib | deflate | none (기본: zlib)
  --preset <NAME>           default | lan | unstable
  --packet-size <SIZE>      데이터그램 최대 크기 (기본: 1472)
  --reply-timeout <MS>      읽기 데드라인 밀리초 (기본: 500)
  --drop-rate <RATIO>       손실 시뮬레이션 0.0~1.0 (기본: 0)
  -v, --verbose             패킷 단위 로그
  -h, --help                이 도움말 출력
"#
                );
                std::process::exit(0);
            }
            _ => {}
        }
        i += 1;
    }

    config
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let server_config = parse_args();

    // 로깅 설정
    let subscriber = FmtSubscriber::builder()
        .with_max_level(if server_config.verbose {
            Level::DEBUG
        } else {
            Level::INFO
        })
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let key = match &server_config.key {
        Some(hex_key) => parse_hex_key(hex_key)?,
        None => {
            let key = generate_key();
            warn!("키가 지정되지 않아 새로 생성: {}", hex::encode(key));
            key
        }
    };
    let pipeline = Pipeline::from_names(&key, &server_config.cipher, &server_config.compressor)?;
    let config = server_config.config.clone();
    config.validate()?;

    info!("UDPX Receiver starting...");
    info!("Bind address: {}", server_config.bind_addr);
    info!("Store directory: {:?}", server_config.dir);
    info!("Pipeline: {:?} ({})", pipeline, server_config.cipher);
    info!("Packet size: {} bytes", config.packet_size);

    let store = Arc::new(DirStore::open(&server_config.dir)?);

    let mut transport: Arc<dyn Transport> =
        Arc::new(UdpTransport::bind(server_config.bind_addr, &config).await?);
    if server_config.drop_rate > 0.0 {
        info!("Loss simulation: {:.1}%", server_config.drop_rate * 100.0);
        transport = Arc::new(LossyTransport::new(transport, server_config.drop_rate));
    }

    let receiver =
        Receiver::start_with_transport(config, transport, pipeline, store.clone(), store)?;
    info!("Listening on {} (Ctrl-C to stop)", receiver.local_addr()?);

    tokio::signal::ctrl_c().await?;
    info!("Stopping...");

    receiver.stop().await?;
    let stats = receiver.join().await?;
    info!("Final stats: {}", stats.summary());

    Ok(())
}
