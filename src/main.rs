use anyhow::Context;
use beneficiary_enrollment::core::wizard::EnrollmentReceipt;
use beneficiary_enrollment::domain::model::{AssociationResult, PersonData};
use beneficiary_enrollment::domain::ports::PlanCatalog;
use beneficiary_enrollment::utils::{logger, validation::Validate};
use beneficiary_enrollment::{
    AppConfig, CliConfig, Command, EnrollmentError, EnrollmentFile, EnrollmentWizard,
    HttpBackend, RelationshipMutator,
};
use clap::Parser;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = CliConfig::parse();

    // 載入配置
    let config = AppConfig::from_file(&cli.config)
        .with_context(|| format!("Failed to load config file '{}'", cli.config))?;

    // 初始化日誌
    if config.json_logging() {
        logger::init_json_logger(config.log_level());
    } else {
        logger::init_cli_logger(cli.verbose, config.log_level());
    }

    tracing::info!("🚀 Starting enrollment tool");
    if cli.verbose {
        tracing::debug!("CLI config: {:?}", cli);
    }

    // 驗證配置
    if let Err(e) = config.validate() {
        tracing::error!("❌ Configuration validation failed: {}", e);
        eprintln!("❌ {}", e.user_friendly_message());
        std::process::exit(1);
    }

    let backend = HttpBackend::new(&config.api)?;
    let mutator = RelationshipMutator::new(backend.clone(), backend.clone());

    if let Err(e) = run(cli.command, &mutator, &backend).await {
        tracing::error!(
            "❌ Command failed: {} (Category: {:?}, Severity: {:?})",
            e,
            e.category(),
            e.severity()
        );
        tracing::error!("💡 Recovery suggestion: {}", e.recovery_suggestion());

        eprintln!("❌ {}", e.user_friendly_message());
        eprintln!("💡 {}", e.recovery_suggestion());

        // 根據錯誤嚴重程度決定退出碼
        let exit_code = e.severity().exit_code();
        if exit_code > 0 {
            std::process::exit(exit_code);
        }
    }

    Ok(())
}

async fn run(
    command: Command,
    mutator: &RelationshipMutator<HttpBackend, HttpBackend>,
    backend: &HttpBackend,
) -> Result<(), EnrollmentError> {
    match command {
        Command::Capacity { titular } => {
            let snapshot = mutator.capacity_snapshot(titular).await?;
            let limit = snapshot
                .capacity
                .map(|c| c.to_string())
                .unwrap_or_else(|| "unlimited".to_string());
            println!("📋 Titular {} (contract {}, plan {})", titular, snapshot.contract_id, snapshot.plan_id);
            println!("  Beneficiaries: {} / {}", snapshot.current_count, limit);
            match snapshot.remaining()? {
                Some(remaining) => println!("  Remaining slots: {}", remaining),
                None => println!("  Remaining slots: unlimited"),
            }
        }
        Command::Candidates { titular } => {
            let candidates = mutator.association_candidates(titular).await?;
            println!("📋 {} candidates for titular {}", candidates.len(), titular);
            for candidate in candidates {
                println!(
                    "  #{} {} ({} {})",
                    candidate.patient_id,
                    candidate.person.data.full_name(),
                    candidate.person.data.document_type,
                    candidate.document_number()
                );
            }
        }
        Command::CreateBeneficiary {
            titular,
            document_type,
            document_number,
            first_name,
            last_name,
            birth_date,
            email,
            phone,
        } => {
            let person = PersonData {
                document_type,
                document_number,
                first_name,
                last_name,
                birth_date: Some(birth_date),
                email,
                phone,
                ..Default::default()
            };
            let created = mutator.create_beneficiary(titular, person).await?;
            println!(
                "✅ Beneficiary #{} created for titular {}",
                created.patient_id, titular
            );
        }
        Command::Associate {
            titular,
            candidates,
        } => {
            let result = mutator.associate_beneficiaries(titular, &candidates).await?;
            print_association(titular, &result);
            if let Some(first) = result.failed.into_iter().next() {
                // 部分失敗時以第一個錯誤決定退出碼
                return Err(first.error);
            }
        }
        Command::Disassociate { beneficiary } => {
            let updated = mutator.disassociate_beneficiary(beneficiary).await?;
            println!("✅ Patient #{} is now unaffiliated", updated.patient_id);
        }
        Command::Enroll { file, dry_run } => {
            let request = EnrollmentFile::from_file(&file)?;
            let plan = backend.get_plan(request.contract.plan_id).await?;

            let mut wizard = EnrollmentWizard::new();
            request.fill_wizard(&mut wizard, plan)?;
            let submission = wizard.begin_submission()?;

            if dry_run {
                tracing::info!("🔍 DRY RUN MODE - every step validated, nothing was created");
                submission.cancel();
                println!("✅ Enrollment request '{}' is valid", file);
                return Ok(());
            }

            let receipt = submission.execute(backend).await?;
            print_receipt(&receipt);
        }
    }
    Ok(())
}

fn print_association(titular: i64, result: &AssociationResult) {
    println!("📋 Association to titular {}:", titular);
    for record in &result.succeeded {
        println!("  ✅ #{}", record.patient_id);
    }
    for failure in &result.failed {
        println!("  ❌ #{}: {}", failure.patient_id, failure.error.user_friendly_message());
    }
}

fn print_receipt(receipt: &EnrollmentReceipt) {
    println!("✅ Enrollment completed!");
    println!("  Titular: #{}", receipt.titular.patient_id);
    println!("  Contract: #{}", receipt.contract.contract_id);
    for beneficiary in &receipt.beneficiaries {
        println!("  Beneficiary: #{}", beneficiary.patient_id);
    }
    println!(
        "  Payment: #{} ({:.2} via {})",
        receipt.payment.payment_id, receipt.payment.amount, receipt.payment.method
    );
}
