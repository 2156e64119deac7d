use anyhow::Context;
use clap::Parser;
use flow_audit::config::{CliArgs, Command};
use flow_audit::utils::error::ErrorSeverity;
use flow_audit::utils::{logger, validation::Validate};
use flow_audit::{AuditCommand, AuditEngine};

fn to_audit_command(command: Command) -> AuditCommand {
    match command {
        Command::Run => AuditCommand::Run,
        Command::Index => AuditCommand::Index,
        Command::Plan => AuditCommand::Plan,
        Command::Scan => AuditCommand::Scan,
        Command::Dedup => AuditCommand::Dedup,
        Command::Validate => AuditCommand::Validate,
        Command::Export => AuditCommand::Export,
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = CliArgs::parse();

    // 初始化日誌
    if args.log_json {
        logger::init_json_logger(args.verbose);
    } else {
        logger::init_cli_logger(args.verbose);
    }

    tracing::info!("Starting flow-audit CLI");
    if args.verbose {
        tracing::debug!("CLI args: {:?}", args);
    }

    let config = args.load_config().context("failed to load configuration")?;

    // 驗證配置
    if let Err(e) = config.validate() {
        tracing::error!("❌ Configuration validation failed: {}", e);
        tracing::error!("💡 Suggestion: {}", e.recovery_suggestion());
        eprintln!("❌ {}", e.user_friendly_message());
        std::process::exit(1);
    }

    if config.monitoring.system_stats {
        tracing::info!("🔍 System monitoring enabled");
    }

    let engine = AuditEngine::for_command(to_audit_command(args.command), config);

    if args.dry_run {
        let described = engine.dry_run().context("dry run failed")?;
        println!("{}", serde_json::to_string_pretty(&described)?);
        return Ok(());
    }

    match engine.run().await {
        Ok(run) => {
            tracing::info!("✅ Audit completed successfully!");
            tracing::info!("📁 Output saved to: {}", run.output_dir.display());
            println!("✅ Audit completed successfully!");
            println!("📁 Output saved to: {}", run.output_dir.display());
            for report in &run.reports {
                println!("  • {} ({}ms): {}", report.stage, report.duration_ms, report.details);
            }
        }
        Err(e) => {
            tracing::error!(
                "❌ Audit failed: {} (Category: {:?}, Severity: {:?})",
                e,
                e.category(),
                e.severity()
            );
            tracing::error!("💡 Recovery suggestion: {}", e.recovery_suggestion());

            eprintln!("❌ {}", e.user_friendly_message());
            eprintln!("💡 建議: {}", e.recovery_suggestion());

            // 根據錯誤嚴重程度決定退出碼
            let exit_code = match e.severity() {
                ErrorSeverity::Low => 0,
                ErrorSeverity::Medium => 2,
                ErrorSeverity::High => 1,
                ErrorSeverity::Critical => 3,
            };

            if exit_code > 0 {
                std::process::exit(exit_code);
            }
        }
    }

    Ok(())
}
