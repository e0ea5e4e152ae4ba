use rusqlite::Connection;

pub fn create_tables(conn: &Connection) -> Result<(), rusqlite::Error> {
    // 加密密钥表
    conn.execute(
        "CREATE TABLE IF NOT EXISTS secrets (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            provider TEXT NOT NULL,
            key_name TEXT NOT NULL,
            ciphertext TEXT NOT NULL,
            salt TEXT NOT NULL,
            nonce TEXT NOT NULL,
            is_active INTEGER NOT NULL DEFAULT 1,
            priority INTEGER NOT NULL DEFAULT 0,
            description TEXT NOT NULL DEFAULT '',
            metadata TEXT,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL,
            created_by INTEGER,
            updated_by INTEGER,
            last_used_at INTEGER,
            usage_count INTEGER NOT NULL DEFAULT 0,
            UNIQUE (provider, key_name)
        )",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_secrets_provider_active ON secrets(provider, is_active)",
        [],
    )?;

    // 密钥审计日志表（只追加）
    conn.execute(
        "CREATE TABLE IF NOT EXISTS secret_audit_log (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            secret_id INTEGER,
            action TEXT NOT NULL,
            operator_id INTEGER,
            operator_ip TEXT,
            old_value TEXT,
            new_value TEXT,
            created_at INTEGER NOT NULL,
            user_agent TEXT,
            request_id TEXT
        )",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_secret_audit_secret ON secret_audit_log(secret_id, created_at)",
        [],
    )?;

    // 用户配额账户表
    conn.execute(
        "CREATE TABLE IF NOT EXISTS quota_accounts (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            user_id INTEGER NOT NULL UNIQUE,
            daily_quota INTEGER NOT NULL DEFAULT 10 CHECK (daily_quota >= 0),
            daily_used INTEGER NOT NULL DEFAULT 0 CHECK (daily_used >= 0),
            daily_reset_at INTEGER NOT NULL,
            monthly_quota INTEGER NOT NULL DEFAULT 300 CHECK (monthly_quota >= 0),
            monthly_used INTEGER NOT NULL DEFAULT 0 CHECK (monthly_used >= 0),
            monthly_reset_at INTEGER NOT NULL,
            permanent_quota INTEGER NOT NULL DEFAULT 0 CHECK (permanent_quota >= 0),
            is_vip INTEGER NOT NULL DEFAULT 0,
            vip_expire_at INTEGER,
            total_consumed INTEGER NOT NULL DEFAULT 0 CHECK (total_consumed >= 0),
            last_consume_at INTEGER,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL,
            deleted_at INTEGER
        )",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_quota_accounts_daily_reset ON quota_accounts(daily_reset_at)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_quota_accounts_monthly_reset ON quota_accounts(monthly_reset_at)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_quota_accounts_vip ON quota_accounts(is_vip, vip_expire_at)",
        [],
    )?;

    // 配额消费流水
    conn.execute(
        "CREATE TABLE IF NOT EXISTS quota_consumption_log (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            user_id INTEGER NOT NULL,
            tier TEXT NOT NULL,
            amount INTEGER NOT NULL CHECK (amount > 0),
            service_type TEXT NOT NULL,
            description TEXT,
            request_id TEXT,
            ip TEXT,
            user_agent TEXT,
            created_at INTEGER NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_quota_consumption_user ON quota_consumption_log(user_id, created_at)",
        [],
    )?;

    // 配额充值流水
    conn.execute(
        "CREATE TABLE IF NOT EXISTS quota_recharge_log (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            user_id INTEGER NOT NULL,
            tier TEXT NOT NULL,
            amount INTEGER NOT NULL CHECK (amount > 0),
            reason TEXT,
            operator_id INTEGER,
            method TEXT NOT NULL DEFAULT 'manual',
            order_id TEXT,
            created_at INTEGER NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_quota_recharge_user ON quota_recharge_log(user_id, created_at)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_quota_recharge_order ON quota_recharge_log(order_id)",
        [],
    )?;

    Ok(())
}
