use std::io::Write;

use clap::{Parser, Subcommand, ValueEnum};

use crate::subcmd::build_lm::build_lm;
use crate::subcmd::inspect::inspect;
use crate::subcmd::package::{package, PackageOptions};
use crate::subcmd::score::{score, ScoreOptions};

mod subcmd;

#[derive(Debug, Clone, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

#[derive(Debug, Parser)]
#[clap(
name = env ! ("CARGO_PKG_NAME"),
version = env ! ("CARGO_PKG_VERSION"),
author = env ! ("CARGO_PKG_AUTHORS"),
about = env ! ("CARGO_PKG_DESCRIPTION"),
arg_required_else_help = true,
)]
struct Args {
    #[clap(flatten)]
    verbose: clap_verbosity_flag::Verbosity,

    #[clap(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    #[clap(arg_required_else_help = true)]
    BuildLm(BuildLmArgs),
    #[clap(arg_required_else_help = true)]
    Package(PackageArgs),
    #[clap(arg_required_else_help = true)]
    Inspect(InspectArgs),
    Score(ScoreArgs),
}

/// ARPA 形式の LM をバイナリ LM に変換する
#[derive(Debug, clap::Args)]
struct BuildLmArgs {
    /// 入力: ARPA ファイル
    arpa: String,
    /// 出力: バイナリ LM ファイル
    dst: String,
}

/// バイナリ LM に辞書とパラメータを付けてスコアラパッケージを作る
#[derive(Debug, clap::Args)]
struct PackageArgs {
    /// alphabet 設定ファイル (UTF-8 モードでは使わない)
    #[arg(long)]
    alphabet: String,
    /// バイナリ LM ファイル
    #[arg(long)]
    lm: String,
    /// 語彙ファイル (空白区切り)
    #[arg(long)]
    vocab: String,
    /// 出力先
    #[arg(long)]
    package: String,
    #[arg(long)]
    default_alpha: f64,
    #[arg(long)]
    default_beta: f64,
    /// UTF-8 モードを強制する。省略時は語彙から判定する
    #[arg(long)]
    utf8: Option<bool>,
}

/// スコアラパッケージのヘッダを表示する
#[derive(Debug, clap::Args)]
struct InspectArgs {
    package: String,
}

/// 文の LM スコアを計算する
#[derive(Debug, clap::Args)]
struct ScoreArgs {
    /// 設定ファイル (省略時は --scorer/--alphabet、それも無ければ XDG の config.yml)
    #[arg(long)]
    config: Option<String>,
    #[arg(long, requires = "alphabet")]
    scorer: Option<String>,
    #[arg(long, requires = "scorer")]
    alphabet: Option<String>,
    #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
    format: OutputFormat,
    /// 省略時は標準入力から 1 行 1 文で読む
    sentences: Vec<String>,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    env_logger::Builder::new()
        .filter_level(args.verbose.log_level_filter())
        .format(|buf, record| {
            let ts = buf.timestamp_micros();
            // show thread id
            writeln!(
                buf,
                "{}: {:?}: {}: {}",
                ts,
                std::thread::current().id(),
                record.level(),
                record.args()
            )
        })
        .init();

    match args.command {
        Commands::BuildLm(opt) => build_lm(opt.arpa.as_str(), opt.dst.as_str()),
        Commands::Package(opt) => package(PackageOptions {
            alphabet: &opt.alphabet,
            lm: &opt.lm,
            vocab: &opt.vocab,
            package: &opt.package,
            default_alpha: opt.default_alpha,
            default_beta: opt.default_beta,
            force_utf8: opt.utf8,
        }),
        Commands::Inspect(opt) => inspect(opt.package.as_str()),
        Commands::Score(opt) => score(ScoreOptions {
            config: opt.config.as_deref(),
            scorer: opt.scorer.as_deref(),
            alphabet: opt.alphabet.as_deref(),
            json_output: matches!(opt.format, OutputFormat::Json),
            sentences: opt.sentences,
        }),
    }
}
