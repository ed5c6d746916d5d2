//! 캔들 적재 및 세션 거래량 집계 CLI.

use chrono::{Duration as ChronoDuration, NaiveDate, Utc};
use clap::{Parser, Subcommand};
use loader_collector::modules::{AggregationTarget, IngestRequest};
use loader_collector::{CollectorConfig, LoaderServices, LogSummary};
use loader_core::time::previous_day_in_reporting_zone;
use loader_core::{init_logging, AssetClass, LogConfig, Resolution, SessionWindow, TaskStatus};
use serde::Serialize;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "loader-collector")]
#[command(about = "T-Invest Candle Loader", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// 설정 파일 경로 (기본: config/default.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// 로그 레벨 (trace, debug, info, warn, error). 설정 파일 값보다 우선
    #[arg(long, global = true)]
    log_level: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// 분봉 적재
    LoadMinute {
        #[command(flatten)]
        target: LoadArgs,
    },

    /// 일봉 적재
    LoadDaily {
        #[command(flatten)]
        target: LoadArgs,
    },

    /// 세션 거래량 집계
    Aggregate {
        /// 단일 종목 FIGI (없으면 카탈로그 전체)
        #[arg(long)]
        figi: Option<String>,

        /// 자산군 (쉼표로 구분, 예: "shares,futures")
        #[arg(long, value_delimiter = ',')]
        asset_classes: Vec<AssetClass>,

        /// 집계 날짜 (기본: 기준 시간대의 어제)
        #[arg(long, conflicts_with_all = ["from", "to"])]
        date: Option<NaiveDate>,

        /// 기간 시작일
        #[arg(long, requires = "to")]
        from: Option<NaiveDate>,

        /// 기간 종료일
        #[arg(long, requires = "from")]
        to: Option<NaiveDate>,
    },

    /// 작업 원장 조회
    Tasks {
        /// 특정 작업 ID
        #[arg(long)]
        id: Option<String>,

        /// 진행 중인 작업만
        #[arg(long)]
        active: bool,

        /// 상태별 조회 (STARTED, PROCESSING, SUCCESS, FAILED)
        #[arg(long)]
        status: Option<TaskStatus>,

        /// 최근 N시간 동안 시작된 작업
        #[arg(long, default_value_t = 24)]
        since_hours: i64,
    },

    /// 세션 집계 결과 조회
    Aggregates {
        /// 특정 종목
        #[arg(long)]
        figi: Option<String>,

        /// 윈도우 (morning, evening, weekend)
        #[arg(long, default_value = "morning")]
        window: SessionWindow,

        /// 윈도우 평균 상위 N개
        #[arg(long)]
        top: Option<i64>,

        /// N일 넘게 재계산되지 않은 종목
        #[arg(long)]
        stale_days: Option<i64>,

        /// 윈도우 평균 통계
        #[arg(long)]
        stats: bool,

        /// 최근 갱신 목록 개수
        #[arg(long, default_value_t = 20)]
        limit: i64,
    },

    /// 하루치 전체 워크플로우 (분봉 → 일봉 → 세션 집계)
    RunDaily {
        /// 대상 날짜 (기본: 기준 시간대의 어제)
        #[arg(long)]
        date: Option<NaiveDate>,
    },

    /// 데몬 모드: 주기적으로 전날 워크플로우 실행
    Daemon,
}

#[derive(clap::Args)]
struct LoadArgs {
    /// 특정 종목만 적재 (쉼표로 구분, 예: "BBG004730N88,BBG004730RP0")
    #[arg(long)]
    instruments: Option<String>,

    /// 자산군 (쉼표로 구분, 예: "shares,futures")
    #[arg(long, value_delimiter = ',')]
    asset_classes: Vec<AssetClass>,

    /// 적재 날짜 (기본: 기준 시간대의 오늘)
    #[arg(long)]
    date: Option<NaiveDate>,
}

impl LoadArgs {
    fn into_request(self, resolution: Resolution) -> IngestRequest {
        let mut request = IngestRequest::new(resolution).with_asset_classes(self.asset_classes);
        if let Some(instruments) = self.instruments {
            request = request.with_instruments(
                instruments
                    .split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(String::from),
            );
        }
        if let Some(date) = self.date {
            request = request.with_date(date);
        }
        request
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<(), Box<dyn std::error::Error>> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // 설정 로드
    let config = CollectorConfig::load(cli.config.as_deref())?;

    // 로깅 초기화
    let mut log_config = LogConfig::from(&config.app.logging);
    if let Some(level) = cli.log_level {
        log_config.level = level;
    }
    init_logging(log_config)?;

    tracing::info!("Candle Loader 시작");
    tracing::debug!(gateway = ?config.app.gateway, ingest = ?config.app.ingest, "설정 로드 완료");

    let services = LoaderServices::connect(&config).await?;

    // 명령 실행
    match cli.command {
        Commands::LoadMinute { target } => {
            let handle = services.ingestor.ingest(target.into_request(Resolution::Minute)).await;
            tracing::info!(task_id = handle.task_id(), "분봉 적재 작업 시작");
            let outcome = handle.wait().await?;
            outcome.log_summary("load-minute");
            print_json(&outcome)?;
        }
        Commands::LoadDaily { target } => {
            let handle = services.ingestor.ingest(target.into_request(Resolution::Day)).await;
            tracing::info!(task_id = handle.task_id(), "일봉 적재 작업 시작");
            let outcome = handle.wait().await?;
            outcome.log_summary("load-daily");
            print_json(&outcome)?;
        }
        Commands::Aggregate {
            figi,
            asset_classes,
            date,
            from,
            to,
        } => {
            let (from, to) = match (from, to) {
                (Some(from), Some(to)) => (from, to),
                _ => {
                    let date = date.unwrap_or_else(previous_day_in_reporting_zone);
                    (date, date)
                }
            };
            let target = match figi {
                Some(figi) => AggregationTarget::Instrument(figi),
                None => AggregationTarget::Catalog(asset_classes),
            };
            let summary = services.aggregator.aggregate_range(target, from, to).await?;
            print_json(&summary)?;
        }
        Commands::Tasks {
            id,
            active,
            status,
            since_hours,
        } => {
            if let Some(id) = id {
                match services.ledger.find(&id).await? {
                    Some(entry) => print_json(&entry)?,
                    None => tracing::warn!(task_id = %id, "작업을 찾을 수 없습니다"),
                }
            } else if active {
                print_json(&services.ledger.active().await?)?;
            } else if let Some(status) = status {
                print_json(&services.ledger.by_status(status).await?)?;
            } else {
                let to = Utc::now();
                let from = to - ChronoDuration::hours(since_hours);
                print_json(&services.ledger.in_range(from, to).await?)?;
            }
        }
        Commands::Aggregates {
            figi,
            window,
            top,
            stale_days,
            stats,
            limit,
        } => {
            let aggregator = &services.aggregator;
            if let Some(figi) = figi {
                match aggregator.get(&figi).await? {
                    Some(aggregate) => print_json(&aggregate)?,
                    None => tracing::warn!(figi = %figi, "집계 결과가 없습니다"),
                }
            } else if stats {
                print_json(&aggregator.window_stats(window).await?)?;
            } else if let Some(top) = top {
                print_json(&aggregator.top(window, top).await?)?;
            } else if let Some(days) = stale_days {
                print_json(&aggregator.stale(days).await?)?;
            } else {
                print_json(&aggregator.recent(limit).await?)?;
            }
        }
        Commands::RunDaily { date } => {
            let date = date.unwrap_or_else(previous_day_in_reporting_zone);
            let report = services.run_daily(date).await?;
            print_json(&report)?;
        }
        Commands::Daemon => {
            tracing::info!(
                "=== 데몬 모드 시작 (주기: {}분) ===",
                config.app.daemon.interval_minutes
            );

            let mut interval = tokio::time::interval(config.app.daemon.interval());
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {
                        tracing::info!("종료 신호 수신, 데몬 종료 중...");
                        break;
                    }
                    _ = interval.tick() => {
                        let date = previous_day_in_reporting_zone();
                        tracing::info!(date = %date, "=== 워크플로우 실행 시작 ===");

                        match services.run_daily(date).await {
                            Ok(report) => {
                                report.aggregation.log_summary("daemon");
                            }
                            Err(e) => {
                                tracing::error!("워크플로우 실패: {}", e);
                            }
                        }

                        tracing::info!(
                            "=== 워크플로우 완료, 다음 실행: {}분 후 ===",
                            config.app.daemon.interval_minutes
                        );
                    }
                }
            }
        }
    }

    services.close().await;
    tracing::info!("Candle Loader 종료");

    Ok(())
}
