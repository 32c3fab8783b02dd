//! UDPX 송신 클라이언트
//!
//! 파일 하나 또는 디렉터리의 모든 파일을 아이템으로 전송한다.
//! 아이템 이름은 파일 이름 (`--name`으로 변경 가능).
//!
//! 사용법:
//!   cargo run --release --bin udpx-send -- [OPTIONS] --file <PATH>
//!
//! 예시:
//!   # 파일 전송
//!   cargo run --release --bin udpx-send -- -s 127.0.0.1:9000 -k <64 hex> -f data.bin
//!
//!   # 디렉터리 전송 + 20% 손실 시뮬레이션
//!   cargo run --release --bin udpx-send -- -k <64 hex> -f ./docs --drop-rate 0.2 --retries 30

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{error, info, Level};
use tracing_subscriber::FmtSubscriber;

use udpx::crypto::parse_hex_key;
use udpx::{Config, Connector, LossyConnector, Pipeline, Sender, UdpConnector};

/// 클라이언트 설정
struct ClientConfig {
    server_addr: SocketAddr,
    path: Option<PathBuf>,
    name: Option<String>,
    key: Option<String>,
    cipher: String,
    compressor: String,
    drop_rate: f64,
    verbose: bool,
    config: Config,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_addr: "127.0.0.1:9000".parse().unwrap(),
            path: None,
            name: None,
            key: None,
            cipher: "chacha".into(),
            compressor: "zlib".into(),
            drop_rate: 0.0,
            verbose: false,
            config: Config::default(),
        }
    }
}

fn parse_args() -> ClientConfig {
    let args: Vec<String> = std::env::args().collect();
    let mut config = ClientConfig::default();

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--server" | "-s" => {
                if i + 1 < args.len() {
                    config.server_addr = args[i + 1].parse().expect("유효한 주소 필요");
                    i += 1;
                }
            }
            "--file" | "-f" => {
                if i + 1 < args.len() {
                    config.path = Some(PathBuf::from(&args[i + 1]));
                    i += 1;
                }
            }
            "--name" | "-n" => {
                if i + 1 < args.len() {
                    config.name = Some(args[i + 1].clone());
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
            "--payload-size" => {
                if i + 1 < args.len() {
                    config.config.payload_size = args[i + 1].parse().expect("유효한 숫자 필요");
                    i += 1;
                }
            }
            "--retries" | "-r" => {
                if i + 1 < args.len() {
                    config.config.send_retries = args[i + 1].parse().expect("유효한 숫자 필요");
                    i += 1;
                }
            }
            "--reply-timeout" => {
                if i + 1 < args.len() {
                    config.config.reply_timeout_ms = args[i + 1].parse().expect("유효한 숫자 필요");
                    i += 1;
                }
            }
            "--send-interval" => {
                if i + 1 < args.len() {
                    config.config.send_interval_us = args[i + 1].parse().expect("유효한 숫자 필요");
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
                config.config.verbose_send = true;
            }
            "--help" | "-h" => {
                println!(
                    r#"UDPX Sender - 암호화/압축 아이템 송신 클라이언트

조각별 확인 + 아이템 해시 검증 기반 전송 프로토콜 송신측
- 수신측이 이미 같은 내용을 갖고 있으면 전송 생략
- 미확인 조각만 재전송

사용법:
  cargo run --release --bin udpx-send -- [OPTIONS] --file <PATH>

옵션:
  -s, --server <ADDR>       수신 서버 주소 (기본: 127.0.0.1:9000)
  -f, --file <PATH>         전송할 파일 또는 디렉터리
  -n, --name <NAME>         아이템 이름 (단일 파일, 기본: 파일 이름)
  -k, --key <HEX>           공유 키 64자 hex (필수)
  --cipher <NAME>           chacha | aes (기본: chacha)
  --compress <NAME>         zlib | deflate | none (기본: zlib)
  --preset <NAME>           default | lan | unstable
  --packet-size <SIZE>      데이터그램 최대 크기 (기본: 1472)
  --payload-size <SIZE>     조각 페이로드 크기 (기본: 1024)
  -r, --retries <N>         재시도 라운드 수 (기본: 8)
  --reply-timeout <MS>      응답 대기 밀리초 (기본: 500)
  --send-interval <US>      패킷 간격 마이크로초 (기본: 50)
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

/// 전송할 (아이템 이름, 파일 경로) 목록
fn collect_items(path: &Path, name: Option<&str>) -> std::io::Result<Vec<(String, PathBuf)>> {
    if path.is_dir() {
        let mut items = Vec::new();
        for entry in std::fs::read_dir(path)? {
            let entry = entry?;
            if entry.file_type()?.is_file() {
                items.push((
                    entry.file_name().to_string_lossy().into_owned(),
                    entry.path(),
                ));
            }
        }
        items.sort();
        return Ok(items);
    }

    let name = match name {
        Some(name) => name.to_string(),
        None => path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.to_string_lossy().into_owned()),
    };
    Ok(vec![(name, path.to_path_buf())])
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let client_config = parse_args();

    // 로깅 설정
    let subscriber = FmtSubscriber::builder()
        .with_max_level(if client_config.verbose {
            Level::DEBUG
        } else {
            Level::INFO
        })
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let Some(hex_key) = &client_config.key else {
        return Err("--key 필요 (수신측과 같은 64자 hex 키)".into());
    };
    let Some(path) = &client_config.path else {
        return Err("--file 필요".into());
    };

    let key = parse_hex_key(hex_key)?;
    let pipeline = Pipeline::from_names(&key, &client_config.cipher, &client_config.compressor)?;
    let config = client_config.config.clone();
    config.validate()?;

    info!("UDPX Sender starting...");
    info!("Server: {}", client_config.server_addr);
    info!("Pipeline: {:?} ({})", pipeline, client_config.cipher);
    info!(
        "Packet size: {} bytes, payload: {} bytes, retries: {}",
        config.packet_size, config.payload_size, config.send_retries
    );

    let mut connector: Arc<dyn Connector> = Arc::new(UdpConnector::new(config.clone()));
    if client_config.drop_rate > 0.0 {
        info!("Loss simulation: {:.1}%", client_config.drop_rate * 100.0);
        connector = Arc::new(LossyConnector::new(connector, client_config.drop_rate));
    }

    let sender = Sender::with_connector(config, client_config.server_addr, pipeline, connector);

    let items = collect_items(path, client_config.name.as_deref())?;
    info!("Items to send: {}", items.len());

    let mut failed = 0usize;
    for (name, file) in &items {
        let data = std::fs::read(file)?;
        match sender.send(name, &data).await {
            Ok(stats) if stats.items_skipped > 0 => info!("  {} - 변경 없음", name),
            Ok(stats) => info!(
                "  {} - {} bytes, {} packets, {} retransmits",
                name,
                data.len(),
                stats.packets_total,
                stats.retransmitted_packets
            ),
            Err(e) => {
                error!("  {} - 전송 실패: {}", name, e);
                failed += 1;
            }
        }
    }

    let totals = sender.totals();
    info!("Transfer complete!");
    info!("  {}", totals.summary());
    info!("  Loss rate: {:.2}%", totals.loss_rate() * 100.0);

    if failed > 0 {
        return Err(format!("{}/{} items failed", failed, items.len()).into());
    }
    Ok(())
}
