use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};
use panel_core::{manage, InMemorySelectionStore, PanelContext};
use shared::domain::{ChannelKind, GuildId, PanelId, RoleId, UserId};
use storage::{NewRole, Storage};

#[derive(Parser, Debug)]
struct Cli {
    #[arg(long, default_value = "sqlite://./data/server.db")]
    database_url: String,
    /// Username of the service account panels act as.
    #[arg(long, default_value = "role-panels")]
    system_user: String,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    CreateUser {
        username: String,
    },
    CreateGuild {
        owner_user_id: i64,
        name: String,
    },
    CreateRole {
        guild_id: i64,
        name: String,
        #[arg(long, default_value_t = 1)]
        rank: i64,
        /// Marks the role as integration-managed.
        #[arg(long)]
        managed: bool,
        #[arg(long)]
        manage_roles: bool,
        /// Lets holders manage panels.
        #[arg(long)]
        manage_guild: bool,
    },
    AddMember {
        guild_id: i64,
        user_id: i64,
    },
    GrantRole {
        guild_id: i64,
        user_id: i64,
        role_id: i64,
    },
    CreateChannel {
        guild_id: i64,
        name: String,
        kind: String,
    },
    PanelCreate {
        guild_id: i64,
        actor_user_id: i64,
        panel_id: String,
        name: String,
    },
    PanelList {
        guild_id: i64,
        actor_user_id: i64,
    },
    PanelDelete {
        guild_id: i64,
        actor_user_id: i64,
        panel_id: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let storage = Storage::new(&cli.database_url).await?;

    match cli.command {
        Command::CreateUser { username } => {
            let user_id = storage.create_user(&username).await?;
            println!("created user_id={}", user_id.0);
        }
        Command::CreateGuild {
            owner_user_id,
            name,
        } => {
            let guild_id = storage.create_guild(&name, UserId(owner_user_id)).await?;
            println!("created guild_id={}", guild_id.0);
        }
        Command::CreateRole {
            guild_id,
            name,
            rank,
            managed,
            manage_roles,
            manage_guild,
        } => {
            let role_id = storage
                .create_role(
                    GuildId(guild_id),
                    NewRole {
                        name: &name,
                        rank,
                        managed,
                        manage_roles,
                        manage_guild,
                    },
                )
                .await?;
            println!("created role_id={}", role_id.0);
        }
        Command::AddMember { guild_id, user_id } => {
            storage
                .add_membership(GuildId(guild_id), UserId(user_id))
                .await?;
            println!("user_id={user_id} joined guild_id={guild_id}");
        }
        Command::GrantRole {
            guild_id,
            user_id,
            role_id,
        } => {
            storage
                .grant_role(
                    GuildId(guild_id),
                    UserId(user_id),
                    RoleId(role_id),
                    "granted via tools",
                )
                .await?;
            println!("granted role_id={role_id} to user_id={user_id}");
        }
        Command::CreateChannel {
            guild_id,
            name,
            kind,
        } => {
            let kind = if kind.eq_ignore_ascii_case("voice") {
                ChannelKind::Voice
            } else {
                ChannelKind::Text
            };
            let channel_id = storage
                .create_channel(GuildId(guild_id), &name, kind)
                .await?;
            println!("created channel_id={}", channel_id.0);
        }
        Command::PanelCreate {
            guild_id,
            actor_user_id,
            panel_id,
            name,
        } => {
            let ctx = panel_context(&storage, &cli.system_user).await?;
            let panel = manage::create_panel(
                &ctx,
                UserId(actor_user_id),
                GuildId(guild_id),
                &panel_id,
                &name,
            )
            .await?;
            println!("created panel_id={}", panel.panel_id);
        }
        Command::PanelList {
            guild_id,
            actor_user_id,
        } => {
            let ctx = panel_context(&storage, &cli.system_user).await?;
            let panels =
                manage::list_panels(&ctx, UserId(actor_user_id), GuildId(guild_id)).await?;
            for panel in panels {
                println!(
                    "{}\t{}\troles={}\tstaff={}",
                    panel.panel_id, panel.display_name, panel.allowed_roles, panel.staff_roles
                );
            }
        }
        Command::PanelDelete {
            guild_id,
            actor_user_id,
            panel_id,
        } => {
            let ctx = panel_context(&storage, &cli.system_user).await?;
            let panel_id = PanelId::parse(panel_id.trim())
                .ok_or_else(|| anyhow::anyhow!("invalid panel id '{panel_id}'"))?;
            manage::delete_panel(&ctx, UserId(actor_user_id), GuildId(guild_id), &panel_id)
                .await?;
            println!("deleted panel_id={panel_id}");
        }
    }

    Ok(())
}

async fn panel_context(storage: &Storage, system_user: &str) -> Result<PanelContext> {
    let system_user_id = storage.create_user(system_user).await?;
    Ok(PanelContext {
        registry: Arc::new(storage.clone()),
        platform: Arc::new(storage.clone()),
        selections: Arc::new(InMemorySelectionStore::new(None)),
        system_user_id,
    })
}
