//! PFT 클라이언트 - Pull File Transfer
//!
//! 서버에서 파일 하나를 받아 인덱스 순서로 재조립
//! - 청크마다 pull 요청, 타임아웃 시 재요청
//! - 완료 전에는 출력 파일을 만들지 않음 (`.part` 후 rename)
//!
//! 사용법:
//!   cargo run --release --bin pft-client -- [OPTIONS]
//!
//! 예시:
//!   cargo run --release --bin pft-client -- --server 127.0.0.1:12000 --file report.pdf

use std::io::Write;
use std::net::SocketAddr;
use std::path::PathBuf;

use tracing::info;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use pft::{Config, FileClient};

/// 클라이언트 설정
struct ClientOptions {
    bind_addr: SocketAddr,
    server_addr: SocketAddr,
    filename: Option<String>,
    output_path: Option<PathBuf>,
    config: Config,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 0)),
            server_addr: SocketAddr::from(([127, 0, 0, 1], 12000)),
            filename: None,
            output_path: None,
            config: Config::default(),
        }
    }
}

const HELP: &str = r#"PFT Client - Pull File Transfer 클라이언트

사용법:
  cargo run --release --bin pft-client -- [OPTIONS]

옵션:
  -b, --bind <ADDR>       로컬 바인드 주소 (기본: 0.0.0.0:0 = 자동 할당)
  -s, --server <ADDR>     서버 주소 (기본: 127.0.0.1:12000)
  -f, --file <NAME>       받을 파일 이름 (생략 시 입력 프롬프트)
  -o, --output <PATH>     저장 경로 (기본: ff<파일 이름>)
  --chunks <N>            희망 청크 수 (기본: 100)
  --timeout <MS>          수신 타임아웃 (기본: 2000)
  --deadline <MS>         전체 전송 마감 (기본: 120000)
  -h, --help              이 도움말 출력
"#;

fn value<'a>(args: &'a [String], i: usize, flag: &str) -> Result<&'a str, String> {
    args.get(i + 1)
        .map(String::as_str)
        .ok_or_else(|| format!("{} 값 필요", flag))
}

fn parse_args() -> Result<ClientOptions, String> {
    let args: Vec<String> = std::env::args().collect();
    let mut options = ClientOptions::default();

    let mut i = 1;
    while i < args.len() {
        let flag = args[i].as_str();
        match flag {
            "--bind" | "-b" => {
                options.bind_addr = value(&args, i, flag)?
                    .parse()
                    .map_err(|e| format!("유효한 주소 필요: {}", e))?;
                i += 1;
            }
            "--server" | "-s" => {
                options.server_addr = value(&args, i, flag)?
                    .parse()
                    .map_err(|e| format!("유효한 주소 필요: {}", e))?;
                i += 1;
            }
            "--file" | "-f" => {
                options.filename = Some(value(&args, i, flag)?.to_string());
                i += 1;
            }
            "--output" | "-o" => {
                options.output_path = Some(PathBuf::from(value(&args, i, flag)?));
                i += 1;
            }
            "--chunks" => {
                options.config.desired_chunks = value(&args, i, flag)?
                    .parse()
                    .map_err(|e| format!("유효한 숫자 필요: {}", e))?;
                i += 1;
            }
            "--timeout" => {
                options.config.recv_timeout_ms = value(&args, i, flag)?
                    .parse()
                    .map_err(|e| format!("유효한 숫자 필요: {}", e))?;
                i += 1;
            }
            "--deadline" => {
                options.config.transfer_deadline_ms = value(&args, i, flag)?
                    .parse()
                    .map_err(|e| format!("유효한 숫자 필요: {}", e))?;
                i += 1;
            }
            "--help" | "-h" => {
                println!("{}", HELP);
                std::process::exit(0);
            }
            other => return Err(format!("알 수 없는 옵션: {}", other)),
        }
        i += 1;
    }

    Ok(options)
}

fn prompt_filename() -> std::io::Result<String> {
    print!("Enter filename to download: ");
    std::io::stdout().flush()?;
    let mut line = String::new();
    std::io::stdin().read_line(&mut line)?;
    Ok(line.trim().to_string())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // 로깅 설정
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let options = parse_args()?;

    let filename = match options.filename {
        Some(name) => name,
        None => prompt_filename()?,
    };
    let output_path = options
        .output_path
        .unwrap_or_else(|| PathBuf::from(format!("ff{}", filename)));

    info!("PFT Client starting...");
    info!("Requesting: {:?} ({} chunks desired)", filename, options.config.desired_chunks);

    let mut client = FileClient::connect(options.config, options.bind_addr, options.server_addr).await?;
    info!("Server address: {}", client.server_addr());
    let download = client.download(&filename).await?;

    // 완료 후에만 최종 경로에 나타나도록
    let mut part_path = output_path.clone().into_os_string();
    part_path.push(".part");
    let part_path = PathBuf::from(part_path);
    std::fs::write(&part_path, &download.data)?;
    std::fs::rename(&part_path, &output_path)?;

    info!(
        "Wrote {:?} ({}/{} chunks, {} bytes)",
        output_path,
        download.stats.chunks_received,
        download.session.total_chunks,
        download.data.len()
    );
    info!(
        "Throughput: {:.1} KB/s, timeout ratio {:.1}%",
        download.stats.throughput() / 1024.0,
        download.stats.timeout_ratio() * 100.0
    );
    info!("Stats: {}", download.stats.summary());

    Ok(())
}
