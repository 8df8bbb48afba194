use anyhow::{anyhow, Result};
use clap::{Parser, Subcommand};
use shared::domain::{ConversationKey, GatewayConfig, OperatorId, StatusTag, TenantId};
use storage::Storage;

#[derive(Parser, Debug)]
struct Cli {
    #[arg(long, default_value = "sqlite://./data/console.db")]
    database_url: String,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Maps an operator to the tenant whose conversations they work.
    LinkOperator {
        operator_id: String,
        tenant_id: String,
    },
    SetGateway {
        tenant_id: String,
        base_url: String,
        api_key: String,
        instance_name: String,
        #[arg(long)]
        socket_url: Option<String>,
    },
    ListConversations {
        tenant_id: String,
    },
    SetStatus {
        tenant_id: String,
        phone: String,
        status: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let storage = Storage::new(&cli.database_url).await?;

    match cli.command {
        Command::LinkOperator {
            operator_id,
            tenant_id,
        } => {
            storage
                .link_operator(&OperatorId(operator_id.clone()), &TenantId(tenant_id.clone()))
                .await?;
            println!("linked operator={operator_id} tenant={tenant_id}");
        }
        Command::SetGateway {
            tenant_id,
            base_url,
            api_key,
            instance_name,
            socket_url,
        } => {
            let config = GatewayConfig {
                base_url,
                socket_url,
                api_key,
                instance_name,
            };
            if !config.is_complete() {
                return Err(anyhow!("base url, api key and instance name are required"));
            }
            storage
                .put_gateway_config(&TenantId(tenant_id.clone()), &config)
                .await?;
            println!(
                "gateway for tenant={tenant_id}: {} instance={}",
                config.base_url(),
                config.instance_name
            );
        }
        Command::ListConversations { tenant_id } => {
            let records = storage.load_status_records(&TenantId(tenant_id)).await?;
            for record in records {
                println!(
                    "{}\t{}\t{}\tunread={}\topen={}\t{}",
                    record.phone,
                    record.contact_name.as_deref().unwrap_or("-"),
                    record.status,
                    record.unread_count,
                    record.is_open,
                    record.last_message.as_deref().unwrap_or(""),
                );
            }
        }
        Command::SetStatus {
            tenant_id,
            phone,
            status,
        } => {
            let status: StatusTag = status.parse()?;
            let key = ConversationKey::from_address(&phone)
                .ok_or_else(|| anyhow!("'{phone}' is not a contact address"))?;
            storage
                .set_status_tag(&TenantId(tenant_id), &key, status)
                .await?;
            println!("status of {key} set to {status}");
        }
    }

    Ok(())
}
