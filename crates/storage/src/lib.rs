use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use panel_core::{GuildPlatform, PanelRegistry};
use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow},
    Pool, Row, Sqlite,
};
use std::{
    collections::BTreeSet,
    fs,
    path::{Path, PathBuf},
    str::FromStr,
};

use shared::domain::{
    ChannelId, ChannelKind, GuildId, MemberSnapshot, MessageId, PanelConfig, PanelId, RoleId,
    RoleSnapshot, UserId,
};

#[derive(Clone)]
pub struct Storage {
    pool: Pool<Sqlite>,
}

#[derive(Debug, Clone)]
pub struct StoredMessage {
    pub message_id: MessageId,
    pub channel_id: ChannelId,
    pub author_id: UserId,
    pub content: String,
    pub components_json: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct RoleAuditEntry {
    pub guild_id: GuildId,
    pub user_id: UserId,
    pub role_id: RoleId,
    pub action: String,
    pub justification: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NewRole<'a> {
    pub name: &'a str,
    pub rank: i64,
    pub managed: bool,
    pub manage_roles: bool,
    pub manage_guild: bool,
}

impl Storage {
    pub async fn new(database_url: &str) -> Result<Self> {
        ensure_sqlite_parent_dir_exists(database_url)?;

        let connect_options = SqliteConnectOptions::from_str(database_url)?
            .create_if_missing(true)
            .foreign_keys(true);
        // Every connection to `sqlite::memory:` is its own database.
        let pool_options = if database_url.starts_with("sqlite::memory:") {
            SqlitePoolOptions::new()
                .max_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
        } else {
            SqlitePoolOptions::new().max_connections(5)
        };
        let pool = pool_options.connect_with(connect_options).await?;
        sqlx::migrate!("./migrations").run(&pool).await?;
        Ok(Self { pool })
    }

    pub async fn health_check(&self) -> Result<()> {
        let _: i64 = sqlx::query_scalar("SELECT 1")
            .fetch_one(&self.pool)
            .await
            .context("sqlite ping failed")?;
        Ok(())
    }

    pub async fn create_user(&self, username: &str) -> Result<UserId> {
        let rec = sqlx::query(
            "INSERT INTO users (username) VALUES (?)
             ON CONFLICT(username) DO UPDATE SET username=excluded.username
             RETURNING id",
        )
        .bind(username)
        .fetch_one(&self.pool)
        .await?;
        Ok(UserId(rec.get::<i64, _>(0)))
    }

    pub async fn username_for_user(&self, user_id: UserId) -> Result<Option<String>> {
        let row = sqlx::query("SELECT username FROM users WHERE id = ?")
            .bind(user_id.0)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|r| r.get::<String, _>(0)))
    }

    /// Creates the guild together with its everyone role and the owner's membership.
    pub async fn create_guild(&self, name: &str, owner_user_id: UserId) -> Result<GuildId> {
        let mut tx = self.pool.begin().await?;
        let rec =
            sqlx::query("INSERT INTO guilds (name, owner_user_id) VALUES (?, ?) RETURNING id")
                .bind(name)
                .bind(owner_user_id.0)
                .fetch_one(&mut *tx)
                .await?;
        let guild_id = GuildId(rec.get::<i64, _>(0));
        sqlx::query(
            "INSERT INTO roles (guild_id, name, rank, is_everyone) VALUES (?, '@everyone', 0, 1)",
        )
        .bind(guild_id.0)
        .execute(&mut *tx)
        .await?;
        sqlx::query("INSERT INTO memberships (guild_id, user_id) VALUES (?, ?)")
            .bind(guild_id.0)
            .bind(owner_user_id.0)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(guild_id)
    }

    pub async fn create_role(&self, guild_id: GuildId, role: NewRole<'_>) -> Result<RoleId> {
        let rec = sqlx::query(
            "INSERT INTO roles (guild_id, name, rank, managed, manage_roles, manage_guild)
             VALUES (?, ?, ?, ?, ?, ?) RETURNING id",
        )
        .bind(guild_id.0)
        .bind(role.name)
        .bind(role.rank)
        .bind(role.managed)
        .bind(role.manage_roles)
        .bind(role.manage_guild)
        .fetch_one(&self.pool)
        .await?;
        Ok(RoleId(rec.get::<i64, _>(0)))
    }

    pub async fn everyone_role(&self, guild_id: GuildId) -> Result<RoleId> {
        let row = sqlx::query("SELECT id FROM roles WHERE guild_id = ? AND is_everyone = 1")
            .bind(guild_id.0)
            .fetch_one(&self.pool)
            .await
            .with_context(|| format!("guild {guild_id} has no everyone role"))?;
        Ok(RoleId(row.get::<i64, _>(0)))
    }

    pub async fn add_membership(&self, guild_id: GuildId, user_id: UserId) -> Result<()> {
        sqlx::query(
            "INSERT INTO memberships (guild_id, user_id) VALUES (?, ?)
             ON CONFLICT(guild_id, user_id) DO NOTHING",
        )
        .bind(guild_id.0)
        .bind(user_id.0)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn create_channel(
        &self,
        guild_id: GuildId,
        name: &str,
        kind: ChannelKind,
    ) -> Result<ChannelId> {
        let rec = sqlx::query(
            "INSERT INTO channels (guild_id, name, kind) VALUES (?, ?, ?) RETURNING id",
        )
        .bind(guild_id.0)
        .bind(name)
        .bind(match kind {
            ChannelKind::Text => "text",
            ChannelKind::Voice => "voice",
        })
        .fetch_one(&self.pool)
        .await?;
        Ok(ChannelId(rec.get::<i64, _>(0)))
    }

    pub async fn guild_for_channel(&self, channel_id: ChannelId) -> Result<Option<GuildId>> {
        let row = sqlx::query("SELECT guild_id FROM channels WHERE id = ?")
            .bind(channel_id.0)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|r| GuildId(r.get::<i64, _>(0))))
    }

    pub async fn member_snapshot(
        &self,
        guild_id: GuildId,
        user_id: UserId,
    ) -> Result<Option<MemberSnapshot>> {
        let Some(row) = sqlx::query(
            "SELECT u.username, g.owner_user_id
             FROM memberships m
             INNER JOIN users u ON u.id = m.user_id
             INNER JOIN guilds g ON g.id = m.guild_id
             WHERE m.guild_id = ? AND m.user_id = ?",
        )
        .bind(guild_id.0)
        .bind(user_id.0)
        .fetch_optional(&self.pool)
        .await?
        else {
            return Ok(None);
        };
        let username = row.get::<String, _>(0);
        let is_owner = row.get::<i64, _>(1) == user_id.0;

        let role_rows = sqlx::query(
            "SELECT r.id, r.rank, r.manage_roles, r.manage_guild
             FROM roles r
             WHERE r.guild_id = ?
               AND (r.is_everyone = 1
                    OR r.id IN (SELECT role_id FROM member_roles WHERE guild_id = ? AND user_id = ?))",
        )
        .bind(guild_id.0)
        .bind(guild_id.0)
        .bind(user_id.0)
        .fetch_all(&self.pool)
        .await?;

        let mut role_ids = BTreeSet::new();
        let mut highest_rank = 0;
        let mut can_manage_roles = is_owner;
        let mut can_manage_guild = is_owner;
        for r in &role_rows {
            role_ids.insert(RoleId(r.get::<i64, _>(0)));
            highest_rank = highest_rank.max(r.get::<i64, _>(1));
            can_manage_roles |= r.get::<bool, _>(2);
            can_manage_guild |= r.get::<bool, _>(3);
        }
        if is_owner {
            highest_rank = i64::MAX;
        }

        Ok(Some(MemberSnapshot {
            guild_id,
            user_id,
            username,
            role_ids,
            highest_rank,
            is_owner,
            can_manage_roles,
            can_manage_guild,
        }))
    }

    pub async fn role_snapshot(
        &self,
        guild_id: GuildId,
        role_id: RoleId,
    ) -> Result<Option<RoleSnapshot>> {
        let row = sqlx::query(
            "SELECT id, guild_id, name, rank, managed, is_everyone, manage_roles, manage_guild
             FROM roles WHERE guild_id = ? AND id = ?",
        )
        .bind(guild_id.0)
        .bind(role_id.0)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.as_ref().map(role_from_row))
    }

    /// Grants `role_id`, recording `justification` in the role audit trail.
    pub async fn grant_role(
        &self,
        guild_id: GuildId,
        user_id: UserId,
        role_id: RoleId,
        justification: &str,
    ) -> Result<()> {
        self.check_mutable_role(guild_id, user_id, role_id).await?;
        let mut tx = self.pool.begin().await?;
        sqlx::query(
            "INSERT INTO member_roles (guild_id, user_id, role_id) VALUES (?, ?, ?)
             ON CONFLICT(guild_id, user_id, role_id) DO NOTHING",
        )
        .bind(guild_id.0)
        .bind(user_id.0)
        .bind(role_id.0)
        .execute(&mut *tx)
        .await?;
        insert_audit(&mut tx, guild_id, user_id, role_id, "add", justification).await?;
        tx.commit().await?;
        Ok(())
    }

    pub async fn revoke_role(
        &self,
        guild_id: GuildId,
        user_id: UserId,
        role_id: RoleId,
        justification: &str,
    ) -> Result<()> {
        self.check_mutable_role(guild_id, user_id, role_id).await?;
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM member_roles WHERE guild_id = ? AND user_id = ? AND role_id = ?")
            .bind(guild_id.0)
            .bind(user_id.0)
            .bind(role_id.0)
            .execute(&mut *tx)
            .await?;
        insert_audit(&mut tx, guild_id, user_id, role_id, "remove", justification).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn check_mutable_role(
        &self,
        guild_id: GuildId,
        user_id: UserId,
        role_id: RoleId,
    ) -> Result<()> {
        let role = self
            .role_snapshot(guild_id, role_id)
            .await?
            .ok_or_else(|| anyhow!("Unknown Role"))?;
        if role.is_everyone || role.managed {
            bail!("Missing Permissions: {} cannot be assigned by hand", role.name);
        }
        let is_member: Option<i64> =
            sqlx::query_scalar("SELECT 1 FROM memberships WHERE guild_id = ? AND user_id = ?")
                .bind(guild_id.0)
                .bind(user_id.0)
                .fetch_optional(&self.pool)
                .await?;
        if is_member.is_none() {
            bail!("Unknown Member");
        }
        Ok(())
    }

    pub async fn list_role_audit(&self, guild_id: GuildId) -> Result<Vec<RoleAuditEntry>> {
        let rows = sqlx::query(
            "SELECT guild_id, user_id, role_id, action, justification, created_at
             FROM role_audit_log WHERE guild_id = ? ORDER BY id ASC",
        )
        .bind(guild_id.0)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .into_iter()
            .map(|r| RoleAuditEntry {
                guild_id: GuildId(r.get::<i64, _>(0)),
                user_id: UserId(r.get::<i64, _>(1)),
                role_id: RoleId(r.get::<i64, _>(2)),
                action: r.get::<String, _>(3),
                justification: r.get::<String, _>(4),
                created_at: r.get::<DateTime<Utc>, _>(5),
            })
            .collect())
    }

    pub async fn insert_message(
        &self,
        channel_id: ChannelId,
        author_id: UserId,
        content: &str,
        components_json: Option<&str>,
    ) -> Result<MessageId> {
        let rec = sqlx::query(
            "INSERT INTO messages (channel_id, author_user_id, content, components_json)
             VALUES (?, ?, ?, ?) RETURNING id",
        )
        .bind(channel_id.0)
        .bind(author_id.0)
        .bind(content)
        .bind(components_json)
        .fetch_one(&self.pool)
        .await?;
        Ok(MessageId(rec.get::<i64, _>(0)))
    }

    pub async fn list_channel_messages(
        &self,
        channel_id: ChannelId,
        limit: u32,
    ) -> Result<Vec<StoredMessage>> {
        let mut rows = sqlx::query(
            "SELECT id, channel_id, author_user_id, content, components_json, created_at
             FROM messages
             WHERE channel_id = ?
             ORDER BY id DESC
             LIMIT ?",
        )
        .bind(channel_id.0)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.reverse();
        Ok(rows
            .into_iter()
            .map(|r| StoredMessage {
                message_id: MessageId(r.get::<i64, _>(0)),
                channel_id: ChannelId(r.get::<i64, _>(1)),
                author_id: UserId(r.get::<i64, _>(2)),
                content: r.get::<String, _>(3),
                components_json: r.get::<Option<String>, _>(4),
                created_at: r.get::<DateTime<Utc>, _>(5),
            })
            .collect())
    }

    pub async fn load_panel(&self, panel_id: &PanelId) -> Result<Option<PanelConfig>> {
        let row = sqlx::query(
            "SELECT panel_id, guild_id, display_name, title, body_text, allowed_role_ids,
                    staff_role_ids, requires_elevated_permission, log_channel_id, created_at
             FROM panels WHERE panel_id = ?",
        )
        .bind(panel_id.as_str())
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(panel_from_row).transpose()
    }

    pub async fn list_panels_for_guild(&self, guild_id: GuildId) -> Result<Vec<PanelConfig>> {
        let rows = sqlx::query(
            "SELECT panel_id, guild_id, display_name, title, body_text, allowed_role_ids,
                    staff_role_ids, requires_elevated_permission, log_channel_id, created_at
             FROM panels WHERE guild_id = ? ORDER BY rowid ASC",
        )
        .bind(guild_id.0)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(panel_from_row).collect()
    }

    pub async fn insert_panel(&self, panel: &PanelConfig) -> Result<bool> {
        let result = sqlx::query(
            "INSERT INTO panels (panel_id, guild_id, display_name, title, body_text,
                                 allowed_role_ids, staff_role_ids, requires_elevated_permission,
                                 log_channel_id, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(panel_id) DO NOTHING",
        )
        .bind(panel.panel_id.as_str())
        .bind(panel.guild_id.0)
        .bind(&panel.display_name)
        .bind(&panel.title)
        .bind(&panel.body_text)
        .bind(encode_role_ids(&panel.allowed_role_ids)?)
        .bind(encode_role_ids(&panel.staff_role_ids)?)
        .bind(panel.requires_elevated_permission)
        .bind(panel.log_channel_id.map(|c| c.0))
        .bind(panel.created_at)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    pub async fn update_panel(&self, panel: &PanelConfig) -> Result<()> {
        let result = sqlx::query(
            "UPDATE panels
             SET display_name = ?, title = ?, body_text = ?, allowed_role_ids = ?,
                 staff_role_ids = ?, requires_elevated_permission = ?, log_channel_id = ?
             WHERE panel_id = ? AND guild_id = ?",
        )
        .bind(&panel.display_name)
        .bind(&panel.title)
        .bind(&panel.body_text)
        .bind(encode_role_ids(&panel.allowed_role_ids)?)
        .bind(encode_role_ids(&panel.staff_role_ids)?)
        .bind(panel.requires_elevated_permission)
        .bind(panel.log_channel_id.map(|c| c.0))
        .bind(panel.panel_id.as_str())
        .bind(panel.guild_id.0)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            bail!("panel '{}' no longer exists", panel.panel_id);
        }
        Ok(())
    }

    pub async fn delete_panel(&self, panel_id: &PanelId) -> Result<bool> {
        let result = sqlx::query("DELETE FROM panels WHERE panel_id = ?")
            .bind(panel_id.as_str())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}

async fn insert_audit(
    tx: &mut sqlx::Transaction<'_, Sqlite>,
    guild_id: GuildId,
    user_id: UserId,
    role_id: RoleId,
    action: &str,
    justification: &str,
) -> Result<()> {
    sqlx::query(
        "INSERT INTO role_audit_log (guild_id, user_id, role_id, action, justification)
         VALUES (?, ?, ?, ?, ?)",
    )
    .bind(guild_id.0)
    .bind(user_id.0)
    .bind(role_id.0)
    .bind(action)
    .bind(justification)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

fn role_from_row(r: &SqliteRow) -> RoleSnapshot {
    RoleSnapshot {
        role_id: RoleId(r.get::<i64, _>(0)),
        guild_id: GuildId(r.get::<i64, _>(1)),
        name: r.get::<String, _>(2),
        rank: r.get::<i64, _>(3),
        managed: r.get::<bool, _>(4),
        is_everyone: r.get::<bool, _>(5),
        manage_roles: r.get::<bool, _>(6),
        manage_guild: r.get::<bool, _>(7),
    }
}

fn panel_from_row(r: &SqliteRow) -> Result<PanelConfig> {
    let raw_id = r.get::<String, _>(0);
    let panel_id =
        PanelId::parse(&raw_id).ok_or_else(|| anyhow!("stored panel id '{raw_id}' is invalid"))?;
    Ok(PanelConfig {
        panel_id,
        guild_id: GuildId(r.get::<i64, _>(1)),
        display_name: r.get::<String, _>(2),
        title: r.get::<String, _>(3),
        body_text: r.get::<String, _>(4),
        allowed_role_ids: decode_role_ids(&r.get::<String, _>(5))
            .with_context(|| format!("panel '{raw_id}' has corrupt allowed_role_ids"))?,
        staff_role_ids: decode_role_ids(&r.get::<String, _>(6))
            .with_context(|| format!("panel '{raw_id}' has corrupt staff_role_ids"))?,
        requires_elevated_permission: r.get::<bool, _>(7),
        log_channel_id: r.get::<Option<i64>, _>(8).map(ChannelId),
        created_at: r.get::<DateTime<Utc>, _>(9),
    })
}

fn encode_role_ids(ids: &[RoleId]) -> Result<String> {
    Ok(serde_json::to_string(ids)?)
}

fn decode_role_ids(raw: &str) -> Result<Vec<RoleId>> {
    Ok(serde_json::from_str(raw)?)
}

fn ensure_sqlite_parent_dir_exists(database_url: &str) -> Result<()> {
    let Some(path) = sqlite_path(database_url) else {
        return Ok(());
    };

    let Some(parent) = path.parent() else {
        return Ok(());
    };

    fs::create_dir_all(parent).with_context(|| {
        format!(
            "failed to create parent directory '{}' for database url '{database_url}'",
            parent.display()
        )
    })?;

    Ok(())
}

fn sqlite_path(database_url: &str) -> Option<PathBuf> {
    if database_url == "sqlite::memory:" || !database_url.starts_with("sqlite:") {
        return None;
    }

    let path = database_url
        .trim_start_matches("sqlite://")
        .trim_start_matches("sqlite:")
        .split('?')
        .next()
        .unwrap_or_default();

    if path.is_empty() {
        return None;
    }

    Some(Path::new(path).to_path_buf())
}

#[async_trait]
impl PanelRegistry for Storage {
    async fn get(&self, panel_id: &PanelId) -> Result<Option<PanelConfig>> {
        self.load_panel(panel_id).await
    }

    async fn list(&self, guild_id: GuildId) -> Result<Vec<PanelConfig>> {
        self.list_panels_for_guild(guild_id).await
    }

    async fn insert(&self, panel: &PanelConfig) -> Result<bool> {
        self.insert_panel(panel).await
    }

    async fn update(&self, panel: &PanelConfig) -> Result<()> {
        self.update_panel(panel).await
    }

    async fn delete(&self, panel_id: &PanelId) -> Result<bool> {
        self.delete_panel(panel_id).await
    }
}

#[async_trait]
impl GuildPlatform for Storage {
    async fn resolve_member(
        &self,
        guild_id: GuildId,
        user_id: UserId,
    ) -> Result<Option<MemberSnapshot>> {
        self.member_snapshot(guild_id, user_id).await
    }

    async fn resolve_role(&self, guild_id: GuildId, role_id: RoleId) -> Result<Option<RoleSnapshot>> {
        self.role_snapshot(guild_id, role_id).await
    }

    async fn text_channel_in_guild(
        &self,
        guild_id: GuildId,
        channel_id: ChannelId,
    ) -> Result<bool> {
        let row = sqlx::query(
            "SELECT 1 FROM channels WHERE id = ? AND guild_id = ? AND kind = 'text'",
        )
        .bind(channel_id.0)
        .bind(guild_id.0)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.is_some())
    }

    async fn add_role_to_member(
        &self,
        guild_id: GuildId,
        user_id: UserId,
        role_id: RoleId,
        justification: &str,
    ) -> Result<()> {
        self.grant_role(guild_id, user_id, role_id, justification)
            .await
    }

    async fn remove_role_from_member(
        &self,
        guild_id: GuildId,
        user_id: UserId,
        role_id: RoleId,
        justification: &str,
    ) -> Result<()> {
        self.revoke_role(guild_id, user_id, role_id, justification)
            .await
    }

    async fn post_message(
        &self,
        guild_id: GuildId,
        channel_id: ChannelId,
        author_id: UserId,
        content: &str,
        components_json: Option<&str>,
    ) -> Result<MessageId> {
        if self.guild_for_channel(channel_id).await? != Some(guild_id) {
            bail!("Unknown Channel");
        }
        self.insert_message(channel_id, author_id, content, components_json)
            .await
    }
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
