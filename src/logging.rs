//! ログ出力の初期化
//!
//! 通常はカラー付きのテキスト、`LOG_FORMAT=json` のときはJSON形式で出力します。
//! 出力レベルは `RUST_LOG` で上書きできます（デフォルトはライブラリと各バイナリで info）。

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

const DEFAULT_DIRECTIVE: &str = "garment_measure=info,prepare_dataset=info,train_model=info,predict=info";

/// グローバルなtracing subscriberを設定する
///
/// 既に設定済みの場合は何もしません（テストから複数回呼ばれても安全）。
pub fn init() {
    let use_json = std::env::var("LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_DIRECTIVE));

    let result = if use_json {
        tracing_subscriber::registry()
            .with(fmt::layer().json())
            .with(env_filter)
            .try_init()
    } else {
        tracing_subscriber::registry()
            .with(
                fmt::layer()
                    .with_ansi(true)
                    .with_target(false)
                    .with_thread_ids(false)
                    .with_file(false)
                    .with_line_number(false),
            )
            .with(env_filter)
            .try_init()
    };

    if result.is_err() {
        tracing::debug!("tracing subscriberは既に初期化されています");
    }
}
