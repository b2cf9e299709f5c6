use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use futures_util::StreamExt;

use unichat_core_sdk::{llm, models::Message, server, settings, state::AppState, telemetry};

/**
 * \brief CLI 程序入口:同一个核心,命令行与本地服务两种用法。
 */
#[derive(Parser, Debug)]
#[command(name = "unichat", version, about = "Unified multi-provider LLM chat")]
struct Cli {
    /** \brief 开启遥测日志(写入 logs/unichat.log)。 */
    #[arg(long, default_value_t = false)]
    telemetry: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /**
     * \brief 注册或整体覆盖一个 Provider(需管理员口令)。
     * \param base_url 自带版本段的 API 基地址,如 https://api.openai.com/v1
     * \param model    可重复给出的模型名,保持给出顺序
     */
    ProviderAdd {
        #[arg(long)]
        name: String,
        #[arg(long)]
        base_url: String,
        #[arg(long, default_value = "")]
        api_key: String,
        #[arg(long = "model")]
        models: Vec<String>,
        #[arg(long)]
        admin_secret: String,
    },

    /** \brief 删除一个 Provider(需管理员口令)。 */
    ProviderRemove {
        #[arg(long)]
        name: String,
        #[arg(long)]
        admin_secret: String,
    },

    /** \brief 列出已注册的 Provider 与模型(不回显密钥)。 */
    Providers,

    /** \brief 轮换管理员口令(需当前口令)。 */
    SetAdminSecret {
        #[arg(long)]
        new_secret: String,
        #[arg(long)]
        admin_secret: String,
    },

    /**
     * \brief 发送一条消息并流式打印回复。
     * \details 不给 provider/model 时使用自动选中的第一个组合。
     */
    Chat {
        #[arg(long)]
        prompt: String,
        #[arg(long)]
        provider: Option<String>,
        #[arg(long)]
        model: Option<String>,
    },

    /** \brief 启动本地 HTTP 服务与前端页面。 */
    Serve {
        #[arg(long, default_value = "127.0.0.1:5173")]
        addr: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    telemetry::set_enabled(cli.telemetry);

    let mut store = settings::SettingsStore::open_default();
    if let Err(e) = store.load() {
        // 设置文件损坏不致命:退回空白默认并继续
        eprintln!("Warning: {} (continuing with defaults)", e);
    }
    let mut app = AppState::new(store);

    match cli.command {
        Commands::ProviderAdd {
            name,
            base_url,
            api_key,
            models,
            admin_secret,
        } => {
            if !app.login(&admin_secret) {
                bail!("incorrect admin secret");
            }
            let count = models.len();
            app.upsert_provider(&name, &base_url, &api_key, models)
                .context("save provider failed")?;
            println!("Saved provider {} ({} models)", name, count);
        }

        Commands::ProviderRemove { name, admin_secret } => {
            if !app.login(&admin_secret) {
                bail!("incorrect admin secret");
            }
            app.delete_provider(&name).context("delete provider failed")?;
            println!("Deleted provider {}", name);
        }

        Commands::Providers => {
            let settings = &app.store.settings;
            if settings.base_urls.is_empty() {
                println!(
                    "No providers yet, run: unichat provider-add --name ... --base-url ... --admin-secret ..."
                );
            }
            for (name, base_url) in &settings.base_urls {
                let models = settings
                    .models
                    .get(name)
                    .map(|m| m.join(", "))
                    .unwrap_or_default();
                println!("{} | {} | [{}]", name, base_url, models);
            }
        }

        Commands::SetAdminSecret {
            new_secret,
            admin_secret,
        } => {
            if !app.login(&admin_secret) {
                bail!("incorrect admin secret");
            }
            app.set_admin_secret(&new_secret)
                .context("save admin secret failed")?;
            println!("Admin secret updated, admin session reset");
        }

        Commands::Chat {
            prompt,
            provider,
            model,
        } => {
            match (provider.as_deref(), model.as_deref()) {
                (Some(provider), Some(model)) => {
                    app.select(provider, model).context("select model failed")?;
                }
                (None, None) => {}
                _ => bail!("--provider and --model must be given together"),
            }
            app.session.append(Message::user(prompt));

            let AppState {
                store,
                selection,
                session,
                ..
            } = &mut app;
            let mut turn = match llm::run_turn(session, selection, &store.settings) {
                Ok(turn) => turn,
                Err(e) => bail!("cannot start turn: {} (register a provider first)", e),
            };

            let mut printed = 0usize;
            while let Some(event) = turn.next().await {
                match event {
                    llm::TurnEvent::Partial(text) => {
                        print!("{}", &text[printed..]);
                        printed = text.len();
                        use std::io::Write;
                        std::io::stdout().flush().ok();
                    }
                    llm::TurnEvent::Completed(_) => println!(),
                    llm::TurnEvent::Failed(text) => {
                        if printed > 0 {
                            println!();
                        }
                        println!("{}", text);
                    }
                }
            }
        }

        Commands::Serve { addr } => {
            server::run(&addr, app).await?;
        }
    }

    Ok(())
}
