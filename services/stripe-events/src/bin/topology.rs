/// スタック構成の合成・検証ツール
///
/// # 使用例
/// ```bash
/// # JSONドキュメントを出力
/// cargo run --bin topology -- synth --variant customers
///
/// # 全バリアントを検証（問題があれば終了コード1）
/// cargo run --bin topology -- validate
///
/// # イベントがルールに一致するか確認
/// cargo run --bin topology -- test-pattern --variant primary \
///   --event '{"source":"stripeWebHookHandler.lambda","detail-type":"cus_1","detail":{"stripeEvent":["customer.subscription.created"]}}'
/// ```
use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use serde_json::Value;
use stripe_events::domain::{EventPattern, Topology, TopologyVariant};
use stripe_events::infrastructure::init_logging;
use tracing::debug;

#[derive(Parser, Debug)]
#[command(name = "topology")]
#[command(about = "Stripeイベントパイプラインのスタック構成を合成・検証")]
struct CliArgs {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// バリアントのJSONドキュメントを出力
    Synth {
        #[arg(long, short = 'v', default_value = "primary")]
        variant: TopologyVariant,

        /// 出力先ファイル（省略時は標準出力）
        #[arg(long, short = 'o')]
        out: Option<PathBuf>,
    },

    /// バリアントを検証（省略時は全バリアント）
    Validate {
        #[arg(long, short = 'v')]
        variant: Option<TopologyVariant>,
    },

    /// イベントJSONがルールのパターンに一致するか評価
    TestPattern {
        #[arg(long, short = 'v', default_value = "primary")]
        variant: TopologyVariant,

        /// 評価するイベントJSON
        #[arg(long, short = 'e')]
        event: String,

        /// ルールのパターンの代わりに使うパターンJSON
        #[arg(long, short = 'p')]
        pattern: Option<String>,
    },
}

fn main() -> Result<ExitCode, Box<dyn std::error::Error>> {
    init_logging();

    let args = CliArgs::parse();
    debug!(?args, "topology起動");

    match args.command {
        Command::Synth { variant, out } => {
            let document = serde_json::to_string_pretty(&Topology::for_variant(variant).synthesize())?;
            match out {
                Some(path) => std::fs::write(path, document + "\n")?,
                None => println!("{}", document),
            }
            Ok(ExitCode::SUCCESS)
        }

        Command::Validate { variant } => {
            let variants = match variant {
                Some(v) => vec![v],
                None => TopologyVariant::ALL.to_vec(),
            };

            let mut failed = false;
            for variant in variants {
                let problems = Topology::for_variant(variant).problems();
                if problems.is_empty() {
                    println!("{}: ok", variant);
                    continue;
                }
                failed = true;
                println!("{}: {} problem(s)", variant, problems.len());
                for problem in problems {
                    println!("  - {}", problem);
                }
            }

            Ok(if failed { ExitCode::FAILURE } else { ExitCode::SUCCESS })
        }

        Command::TestPattern {
            variant,
            event,
            pattern,
        } => {
            let event: Value = serde_json::from_str(&event)?;
            let patterns = match pattern {
                Some(text) => vec![("custom".to_string(), EventPattern::from_json(&text)?)],
                None => Topology::for_variant(variant)
                    .rules
                    .into_iter()
                    .map(|rule| (rule.rule_name, rule.event_pattern))
                    .collect(),
            };

            let mut any_match = false;
            for (name, pattern) in patterns {
                let matched = pattern.matches_value(&event);
                any_match |= matched;
                println!("{}: {}", name, if matched { "match" } else { "no match" });
            }

            Ok(if any_match { ExitCode::SUCCESS } else { ExitCode::FAILURE })
        }
    }
}
