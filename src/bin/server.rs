//! PFT 서버 - Pull File Transfer
//!
//! 디렉터리의 파일을 이름으로 제공하는 pull 방식 UDP 파일 서버
//! - 클라이언트 요청마다 무작위 순서로 청크 하나씩 전송
//! - 한 번에 한 세션씩 처리
//!
//! 사용법:
//!   cargo run --release --bin pft-server -- [OPTIONS]
//!
//! 예시:
//!   cargo run --release --bin pft-server -- --bind 0.0.0.0:12000 --dir ./files

use std::net::SocketAddr;
use std::path::PathBuf;

use tracing::info;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use pft::{Config, DirStore, FileServer, RandomOrder};

/// 서버 설정
struct ServerOptions {
    bind_addr: SocketAddr,
    root: PathBuf,
    seed: Option<u64>,
    config: Config,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 12000)),
            root: PathBuf::from("."),
            seed: None,
            config: Config::default(),
        }
    }
}

const HELP: &str = r#"PFT Server - Pull File Transfer 서버

사용법:
  cargo run --release --bin pft-server -- [OPTIONS]

옵션:
  -b, --bind <ADDR>         바인드 주소 (기본: 0.0.0.0:12000)
  -d, --dir <PATH>          제공할 파일 디렉터리 (기본: .)
  --max-payload <BYTES>     청크 페이로드 상한 (기본: 1396)
  --chunks <N>              파싱 실패 시 기본 청크 수 (기본: 100)
  --idle-timeout <MS>       세션 유휴 타임아웃 (기본: 30000)
  --seed <N>                전달 순서 RNG 시드 (재현용)
  -h, --help                이 도움말 출력
"#;

fn value<'a>(args: &'a [String], i: usize, flag: &str) -> Result<&'a str, String> {
    args.get(i + 1)
        .map(String::as_str)
        .ok_or_else(|| format!("{} 값 필요", flag))
}

fn parse_args() -> Result<ServerOptions, String> {
    let args: Vec<String> = std::env::args().collect();
    let mut options = ServerOptions::default();

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
            "--dir" | "-d" => {
                options.root = PathBuf::from(value(&args, i, flag)?);
                i += 1;
            }
            "--max-payload" => {
                options.config.max_payload = value(&args, i, flag)?
                    .parse()
                    .map_err(|e| format!("유효한 숫자 필요: {}", e))?;
                i += 1;
            }
            "--chunks" => {
                options.config.desired_chunks = value(&args, i, flag)?
                    .parse()
                    .map_err(|e| format!("유효한 숫자 필요: {}", e))?;
                i += 1;
            }
            "--idle-timeout" => {
                options.config.session_idle_timeout_ms = value(&args, i, flag)?
                    .parse()
                    .map_err(|e| format!("유효한 숫자 필요: {}", e))?;
                i += 1;
            }
            "--seed" => {
                options.seed = Some(
                    value(&args, i, flag)?
                        .parse()
                        .map_err(|e| format!("유효한 숫자 필요: {}", e))?,
                );
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

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // 로깅 설정
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let options = parse_args()?;

    info!("PFT Server starting...");
    info!("Bind address: {}", options.bind_addr);
    info!("Max payload: {} bytes", options.config.max_payload);
    info!("Idle timeout: {} ms", options.config.session_idle_timeout_ms);

    let order = match options.seed {
        Some(seed) => RandomOrder::with_seed(seed),
        None => RandomOrder::new(),
    };
    let store = DirStore::new(options.root);
    info!("Serving directory: {:?}", store.root());

    let server = FileServer::bind(options.config, options.bind_addr, store, order).await?;
    server.run().await?;

    Ok(())
}
