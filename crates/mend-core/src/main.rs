use std::path::PathBuf;

use clap::{Arg, ArgAction, Command, value_parser};
use tracing_subscriber::EnvFilter;

use mend_core::{CycleResult, FixCycle, FixCycleOptions};
use mend_gate::{AgentMode, SessionMemory};
use mend_memory::{write_whitelist_draft, DraftOptions};
use mend_patch::BackupStore;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Command::new("mend")
        .version(mend_core::VERSION)
        .about("Patch plan executor with verification, rollback and approval gates")
        .arg_required_else_help(true)
        .subcommand(
            Command::new("fix")
                .about("Apply the staged patch plan (mend_plan.json) through the fix cycle")
                .arg(
                    Arg::new("root")
                        .default_value(".")
                        .value_parser(value_parser!(PathBuf))
                        .help("Project root containing the patch plan"),
                )
                .arg(
                    Arg::new("dry-run")
                        .long("dry-run")
                        .action(ArgAction::SetTrue)
                        .help("Evaluate the plan without writing files"),
                )
                .arg(
                    Arg::new("mode")
                        .long("mode")
                        .default_value("assist")
                        .value_parser(["assist", "hybrid", "auto"])
                        .help("Agent mode governing the policy gate"),
                )
                .arg(
                    Arg::new("approve")
                        .long("approve")
                        .value_name("IDX[,IDX...]")
                        .help("Approve operation indexes (1-based), e.g. --approve 1,3"),
                )
                .arg(
                    Arg::new("reject")
                        .long("reject")
                        .value_name("IDX[,IDX...]")
                        .help("Reject operation indexes (1-based), e.g. --reject 2"),
                )
                .arg(
                    Arg::new("team-mode")
                        .long("team-mode")
                        .action(ArgAction::SetTrue)
                        .help("Stage the plan to .mend/pending_plan.json for review and exit"),
                )
                .arg(
                    Arg::new("apply-approved")
                        .long("apply-approved")
                        .action(ArgAction::SetTrue)
                        .help("Apply operations marked team_decision='approve' in the pending plan"),
                )
                .arg(
                    Arg::new("token")
                        .long("token")
                        .value_name("TOKEN")
                        .help("Confirmation token printed when the pending plan was staged"),
                )
                .arg(
                    Arg::new("verify-cmd")
                        .long("verify-cmd")
                        .value_name("CMD")
                        .help("Override the verification command"),
                )
                .arg(
                    Arg::new("timeout")
                        .long("timeout")
                        .value_name("SECS")
                        .value_parser(value_parser!(u64))
                        .help("Verification timeout in seconds"),
                )
                .arg(
                    Arg::new("session")
                        .long("session")
                        .value_name("ID")
                        .help("Session key for reusing approval and rejection memory"),
                )
                .arg(
                    Arg::new("ignore-campaign")
                        .long("ignore-campaign")
                        .action(ArgAction::SetTrue)
                        .help("Retry operations the campaign memory would skip"),
                ),
        )
        .subcommand(
            Command::new("backups")
                .about("List or restore run-scoped backups under .mend_backups")
                .arg(
                    Arg::new("root")
                        .default_value(".")
                        .value_parser(value_parser!(PathBuf))
                        .help("Project root"),
                )
                .arg(
                    Arg::new("restore")
                        .long("restore")
                        .action(ArgAction::SetTrue)
                        .help("Restore files from a backup run"),
                )
                .arg(
                    Arg::new("run")
                        .long("run")
                        .value_name("RUN_ID")
                        .help("Backup run to restore; defaults to the most recent"),
                ),
        )
        .subcommand(
            Command::new("whitelist-draft")
                .about("Draft a policy whitelist from campaign verify-success evidence")
                .arg(
                    Arg::new("root")
                        .default_value(".")
                        .value_parser(value_parser!(PathBuf))
                        .help("Project root"),
                )
                .arg(
                    Arg::new("min-success")
                        .long("min-success")
                        .default_value("2")
                        .value_parser(value_parser!(usize))
                        .help("Verify successes a candidate needs to be drafted"),
                )
                .arg(
                    Arg::new("allow-auto")
                        .long("allow-auto")
                        .action(ArgAction::SetTrue)
                        .help("Mark drafted entries allow_in_auto=true"),
                )
                .arg(
                    Arg::new("kinds")
                        .long("kinds")
                        .value_name("K1,K2,...")
                        .default_value("extract_block_to_helper")
                        .help("Operation kinds to draft"),
                )
                .arg(
                    Arg::new("all-kinds")
                        .long("all-kinds")
                        .action(ArgAction::SetTrue)
                        .help("Draft every candidate kind"),
                ),
        );

    let matches = cli.get_matches();

    match matches.subcommand() {
        Some(("fix", args)) => {
            let root = args.get_one::<PathBuf>("root").unwrap().clone();
            let options = FixCycleOptions {
                mode: AgentMode::parse_lenient(args.get_one::<String>("mode").unwrap()),
                session_id: args.get_one::<String>("session").cloned(),
                dry_run: args.get_flag("dry-run"),
                team_mode: args.get_flag("team-mode"),
                apply_approved: args.get_flag("apply-approved"),
                approve_ops: args.get_one::<String>("approve").cloned(),
                reject_ops: args.get_one::<String>("reject").cloned(),
                approval_token: args.get_one::<String>("token").cloned(),
                verify_cmd: args.get_one::<String>("verify-cmd").cloned(),
                verify_timeout: args.get_one::<u64>("timeout").copied(),
                ignore_campaign: args.get_flag("ignore-campaign"),
            };
            let apply_approved = options.apply_approved;
            let cycle = FixCycle::new(options);

            let result = if apply_approved {
                cycle.run(&root, Vec::new()).await
            } else {
                match mend_core::load_plan(&root) {
                    Ok(Some(operations)) => cycle.run(&root, operations).await,
                    Ok(None) => cycle.no_plan(&root),
                    Err(err) => {
                        eprintln!("error: {}", err);
                        std::process::exit(1);
                    }
                }
            };

            print_fix_summary(&result);
            std::process::exit(result.return_code);
        }
        Some(("backups", args)) => {
            let root = args.get_one::<PathBuf>("root").unwrap();
            let store = BackupStore::new(root);

            if args.get_flag("restore") {
                let run_id = args.get_one::<String>("run").map(String::as_str);
                match store.restore(run_id) {
                    Ok(report) => {
                        println!("Restored run: {}", report.run_id);
                        println!("Files restored: {}", report.restored.len());
                        for path in &report.restored {
                            println!("  {}", path.display());
                        }
                        for error in &report.errors {
                            println!("  ERROR: {}", error);
                        }
                        std::process::exit(i32::from(!report.errors.is_empty()));
                    }
                    Err(err) => {
                        eprintln!("error: {}", err);
                        std::process::exit(1);
                    }
                }
            }

            match store.list_runs() {
                Ok(runs) if runs.is_empty() => println!("No backup runs found."),
                Ok(runs) => {
                    println!("Backup runs (newest first):");
                    for run in runs.iter().rev() {
                        println!("  {}", run);
                    }
                }
                Err(err) => {
                    eprintln!("error: {}", err);
                    std::process::exit(1);
                }
            }
        }
        Some(("whitelist-draft", args)) => {
            let root = args.get_one::<PathBuf>("root").unwrap();
            let kinds = args
                .get_one::<String>("kinds")
                .unwrap()
                .split(',')
                .map(|k| k.trim().to_string())
                .filter(|k| !k.is_empty())
                .collect();
            let options = DraftOptions {
                min_success: *args.get_one::<usize>("min-success").unwrap(),
                allow_auto: args.get_flag("allow-auto"),
                all_kinds: args.get_flag("all-kinds"),
                kinds,
            };

            match write_whitelist_draft(root, &SessionMemory::new(root), &options) {
                Ok(report) => {
                    println!("Whitelist draft written: {}", report.written.display());
                    println!("Operations drafted: {}", report.operations);
                    if report.operations == 0 {
                        println!("No candidates met the threshold; run more verified cycles first.");
                    }
                }
                Err(err) => {
                    eprintln!("error: {}", err);
                    std::process::exit(1);
                }
            }
        }
        _ => {}
    }
}

fn print_fix_summary(result: &CycleResult) {
    let report = &result.report;

    if let Some(message) = &report.message {
        println!("{}", message);
    }
    if result.dry_run {
        println!("Dry run: no files written");
    }

    if !report.modified.is_empty() {
        println!("Modified: {}", report.modified.len());
        for path in &report.modified {
            println!("  {}", path.display());
        }
    }
    if !report.skipped.is_empty() {
        println!("Skipped: {}", report.skipped.len());
        for (target, reason) in &report.skipped {
            println!("  {}: {}", target, reason);
        }
    }
    for error in &report.errors {
        println!("Operation error: {}: {}", error.path, error.error);
    }

    if let Some(verify) = &report.verify {
        println!("Verify: {}", if verify.success { "PASSED" } else { "FAILED" });
        if let Some(reason) = &verify.reason {
            println!("  Reason: {}", reason);
        }
    }
    if let Some(rollback) = &report.rollback {
        if rollback.done {
            println!("Rollback: restored {} file(s)", rollback.restored.len());
        }
        for error in &rollback.errors {
            println!("  Rollback ERROR: {}", error);
        }
    }
    if let Some(error) = &report.error {
        println!("Error: {}", error);
    }
    println!("Exit: {}", result.return_code);
}
