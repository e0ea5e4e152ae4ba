//! vault-admin - 凭证保险库与配额管理命令行工具

use std::io::BufRead;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{anyhow, bail, Context};
use bblearning_core::{PageRequest, WithWarnings};
use bblearning_crypto::Zeroizing;
use bblearning_credential::{AuditContext, CreateSecretRequest, SecretDto, SecretFilter};
use bblearning_quota::{
    QuotaInfo, QuotaTier, RechargeMethod, RechargeRequest, RequestMeta, ServiceType, SweepJob,
};
use bblearning_vault::{
    encryptor_from_env, mask_secret, VaultConfig, VaultEngine, DEFAULT_CONFIG_PATH,
};
use chrono::{Duration, Utc};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;

/// `add` 未给出 `--key` 时读取的环境变量
const SECRET_ENV: &str = "VAULT_SECRET";

#[derive(Parser)]
#[command(name = "vault-admin")]
#[command(about = "管理 AI 服务密钥与用户配额")]
#[command(version)]
struct Cli {
    /// 配置文件路径
    #[arg(short, long, global = true, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// 执行操作的管理员 ID
    #[arg(long, global = true, default_value_t = 1)]
    operator: i64,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// 生成新的主密钥（hex）
    Genkey,

    /// 添加或轮换密钥
    Add {
        /// 服务提供商，如 deepseek、openai
        #[arg(short, long)]
        provider: String,
        /// 密钥名称
        #[arg(short, long, default_value = "default")]
        name: String,
        /// 密钥明文；不指定时读取 VAULT_SECRET 环境变量，再退回标准输入
        #[arg(short, long)]
        key: Option<String>,
        #[arg(short, long, default_value = "")]
        desc: String,
        #[arg(long, default_value_t = 100)]
        priority: i32,
    },

    /// 列出密钥
    List {
        #[arg(short, long)]
        provider: Option<String>,
        /// 只显示启用的密钥
        #[arg(long)]
        active_only: bool,
        #[arg(long, default_value_t = 1)]
        page: u32,
        #[arg(long, default_value_t = 20)]
        page_size: u32,
    },

    /// 解密测试（脱敏显示）
    Test {
        #[arg(short, long)]
        provider: String,
        /// 不指定时按优先级选择
        #[arg(short, long)]
        name: Option<String>,
    },

    /// 启用或停用密钥
    Status {
        id: i64,
        /// 停用（默认启用）
        #[arg(long)]
        disable: bool,
    },

    /// 删除密钥
    Delete { id: i64 },

    /// 查看审计日志
    Audit {
        #[arg(long)]
        secret_id: Option<i64>,
        #[arg(long, default_value_t = 20)]
        limit: u32,
        #[arg(long, default_value_t = 0)]
        offset: u32,
    },

    /// 用户配额管理
    Quota {
        #[command(subcommand)]
        command: QuotaCommands,
    },

    /// 立即执行一次定时任务：daily、monthly、vip 或 all
    Sweep {
        #[arg(default_value = "all")]
        job: String,
    },

    /// 前台运行定时任务，Ctrl-C 退出
    Scheduler,
}

#[derive(Subcommand)]
enum QuotaCommands {
    /// 查看用户配额
    Show { user_id: i64 },

    /// 扣减配额
    Consume {
        user_id: i64,
        amount: i64,
        /// chat、generate、grade、diagnose、ocr
        #[arg(long, default_value = "chat")]
        service: String,
    },

    /// 充值配额
    Recharge {
        user_id: i64,
        /// daily、monthly、permanent
        tier: String,
        amount: i64,
        #[arg(long, default_value = "管理员充值")]
        reason: String,
        /// manual、purchase、reward、vip
        #[arg(long, default_value = "manual")]
        method: String,
        #[arg(long)]
        order_id: Option<String>,
    },

    /// 设置 VIP
    Vip {
        user_id: i64,
        /// 有效天数
        #[arg(long, default_value_t = 30)]
        days: i64,
        /// 额外赠送的永久配额
        #[arg(long, default_value_t = 0)]
        extra: i64,
    },

    /// 取消 VIP
    CancelVip { user_id: i64 },

    /// 查看消费或充值流水
    Logs {
        user_id: i64,
        /// 查看充值流水
        #[arg(long)]
        recharge: bool,
        #[arg(long, default_value_t = 1)]
        page: u32,
        #[arg(long, default_value_t = 20)]
        page_size: u32,
    },
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let cli = Cli::parse();

    if let Err(e) = run(cli).await {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    if let Commands::Genkey = cli.command {
        let key = bblearning_crypto::generate_master_key_hex()?;
        println!("{}", key.as_str());
        eprintln!("请将该值设置为 ENCRYPTION_MASTER_KEY 环境变量并妥善保管");
        return Ok(());
    }

    let config = VaultConfig::load_or_default(&cli.config)
        .with_context(|| format!("加载配置 {} 失败", cli.config.display()))?;
    let encryptor = encryptor_from_env().context("初始化加密器失败")?;
    let engine = VaultEngine::from_config(&config, Arc::new(encryptor))?;

    let result = dispatch(&engine, cli.command, cli.operator).await;
    engine.shutdown(None).await;
    result
}

async fn dispatch(engine: &VaultEngine, command: Commands, operator: i64) -> anyhow::Result<()> {
    let credentials = engine.credentials();
    let quota = engine.quota();

    match command {
        Commands::Genkey => {}
        Commands::Add {
            provider,
            name,
            key,
            desc,
            priority,
        } => {
            let key = resolve_secret(
                key,
                std::env::var(SECRET_ENV).ok(),
                std::io::stdin().lock(),
            )?;
            let request = CreateSecretRequest::new(provider, name, key.as_str())
                .with_description(desc)
                .with_priority(priority);
            let created = credentials
                .create(request, AuditContext::operator(operator))
                .await?;
            print_warnings(&created);
            println!("✓ 密钥已保存");
            print_secret(&created.value);
        }
        Commands::List {
            provider,
            active_only,
            page,
            page_size,
        } => {
            let mut filter = SecretFilter {
                provider,
                ..Default::default()
            };
            if active_only {
                filter = filter.active_only();
            }
            let result = credentials
                .list(filter, PageRequest::new(page, page_size))
                .await?;
            if result.items.is_empty() {
                println!("没有找到密钥");
            } else {
                println!("共 {} 个密钥（第 {} 页）:\n", result.total, result.page);
                for dto in &result.items {
                    print_secret(dto);
                    println!("---");
                }
            }
        }
        Commands::Test { provider, name } => {
            let plaintext = match name {
                Some(name) => credentials.get_decrypted(&provider, &name).await?,
                None => credentials.get_decrypted_preferred(&provider).await?,
            };
            println!("✓ 解密成功: {}", mask_secret(&plaintext));
        }
        Commands::Status { id, disable } => {
            let updated = credentials
                .update_status(id, !disable, AuditContext::operator(operator))
                .await?;
            print_warnings(&updated);
            println!(
                "✓ 密钥 {} 已{}",
                id,
                if updated.value.is_active { "启用" } else { "停用" }
            );
        }
        Commands::Delete { id } => {
            let deleted = credentials
                .delete(id, AuditContext::operator(operator))
                .await?;
            print_warnings(&deleted);
            println!(
                "✓ 已删除 {}:{}",
                deleted.value.provider, deleted.value.key_name
            );
        }
        Commands::Audit {
            secret_id,
            limit,
            offset,
        } => {
            let entries = credentials.get_audit_logs(secret_id, limit, offset).await?;
            for entry in &entries {
                println!(
                    "[{}] #{} {} secret={:?} operator={:?}",
                    entry.created_at.format("%Y-%m-%d %H:%M:%S"),
                    entry.id,
                    entry.action.as_str(),
                    entry.secret_id,
                    entry.operator_id
                );
            }
        }
        Commands::Quota { command } => match command {
            QuotaCommands::Show { user_id } => {
                print_quota(&quota.get_user_quota(user_id).await?)?;
            }
            QuotaCommands::Consume {
                user_id,
                amount,
                service,
            } => {
                let service_type = ServiceType::parse(&service)
                    .ok_or_else(|| anyhow!("未知的服务类型: {}", service))?;
                let receipt = quota
                    .check_and_consume(user_id, amount, service_type, RequestMeta::generated())
                    .await?;
                print_warnings(&receipt);
                for draw in &receipt.value.draws {
                    println!("扣减 {} 配额 {}", draw.tier.label(), draw.amount);
                }
                print_quota(&receipt.value.info)?;
            }
            QuotaCommands::Recharge {
                user_id,
                tier,
                amount,
                reason,
                method,
                order_id,
            } => {
                let tier =
                    QuotaTier::parse(&tier).ok_or_else(|| anyhow!("未知的配额类型: {}", tier))?;
                let method = RechargeMethod::parse(&method)
                    .ok_or_else(|| anyhow!("未知的充值方式: {}", method))?;
                let mut request = RechargeRequest::manual(user_id, tier, amount, reason)
                    .with_operator(operator)
                    .with_method(method);
                if let Some(order_id) = order_id {
                    request = request.with_order_id(order_id);
                }
                let info = quota.recharge_quota(request).await?;
                print_warnings(&info);
                print_quota(&info.value)?;
            }
            QuotaCommands::Vip {
                user_id,
                days,
                extra,
            } => {
                if days <= 0 {
                    bail!("VIP 天数必须大于 0");
                }
                let expire_at = Utc::now() + Duration::days(days);
                let info = quota
                    .set_vip(user_id, expire_at, extra, Some(operator))
                    .await?;
                print_warnings(&info);
                print_quota(&info.value)?;
            }
            QuotaCommands::CancelVip { user_id } => {
                print_quota(&quota.cancel_vip(user_id).await?)?;
            }
            QuotaCommands::Logs {
                user_id,
                recharge,
                page,
                page_size,
            } => {
                let page = PageRequest::new(page, page_size);
                if recharge {
                    let logs = quota.get_recharge_logs(user_id, page).await?;
                    println!("共 {} 条充值记录", logs.total);
                    for entry in &logs.items {
                        println!(
                            "[{}] {} +{} {} {}",
                            entry.created_at.format("%Y-%m-%d %H:%M:%S"),
                            entry.tier.as_str(),
                            entry.amount,
                            entry.method.as_str(),
                            entry.reason.as_deref().unwrap_or("")
                        );
                    }
                } else {
                    let logs = quota.get_quota_logs(user_id, page).await?;
                    println!("共 {} 条消费记录", logs.total);
                    for entry in &logs.items {
                        println!(
                            "[{}] {} -{} {} {}",
                            entry.created_at.format("%Y-%m-%d %H:%M:%S"),
                            entry.tier.as_str(),
                            entry.amount,
                            entry.service_type.as_str(),
                            entry.description.as_deref().unwrap_or("")
                        );
                    }
                }
            }
        },
        Commands::Sweep { job } => {
            let jobs = if job == "all" {
                SweepJob::ALL.to_vec()
            } else {
                vec![SweepJob::parse(&job).ok_or_else(|| anyhow!("未知的任务: {}", job))?]
            };
            for job in jobs {
                let count = job.run(quota).await?;
                println!("✓ {}: 影响 {} 个账户", job.as_str(), count);
            }
        }
        Commands::Scheduler => {
            let shutdown = CancellationToken::new();
            let Some(handle) = engine.start_scheduler(shutdown.clone())? else {
                println!("定时任务在配置中已关闭");
                return Ok(());
            };
            tokio::signal::ctrl_c().await?;
            handle.shutdown().await;
        }
    }

    Ok(())
}

fn print_warnings<T>(result: &WithWarnings<T>) {
    for warning in &result.warnings {
        eprintln!("警告: {}", warning);
    }
}

fn print_secret(dto: &SecretDto) {
    println!("ID: {}", dto.id);
    println!("Provider: {}", dto.provider);
    println!("KeyName: {}", dto.key_name);
    println!("IsActive: {}", dto.is_active);
    println!("Priority: {}", dto.priority);
    println!("Description: {}", dto.description);
    println!("UsageCount: {}", dto.usage_count);
    println!("CreatedAt: {}", dto.created_at.format("%Y-%m-%d %H:%M:%S"));
}

fn print_quota(info: &QuotaInfo) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(info)?);
    Ok(())
}

/// 依次取命令行参数、环境变量、标准输入第一行
fn resolve_secret(
    arg: Option<String>,
    env: Option<String>,
    mut input: impl BufRead,
) -> anyhow::Result<Zeroizing<String>> {
    if let Some(secret) = arg.or(env).filter(|s| !s.is_empty()) {
        return Ok(Zeroizing::new(secret));
    }

    eprintln!("请输入密钥明文:");
    let mut line = Zeroizing::new(String::new());
    input.read_line(&mut line).context("读取标准输入失败")?;
    let secret = line.trim_end_matches(['\r', '\n']);
    if secret.is_empty() {
        bail!("未提供密钥明文");
    }
    Ok(Zeroizing::new(secret.to_string()))
}
