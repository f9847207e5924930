use sqlx::PgPool;

use crate::models::TenantQueueSettings;

/// Insert or overwrite the tenant's settings row.
pub async fn upsert(
    pool: &PgPool,
    settings: &TenantQueueSettings,
) -> Result<TenantQueueSettings, sqlx::Error> {
    sqlx::query_as::<_, TenantQueueSettings>(
        "INSERT INTO tenant_queue_settings
            (tenant_id, rate_limit_per_minute, delay_between_messages, send_time_start,
             send_time_end, utc_offset_minutes, auto_process, enable_retries,
             log_all_messages, max_retries, updated_at)
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
         ON CONFLICT (tenant_id) DO UPDATE SET
           rate_limit_per_minute = EXCLUDED.rate_limit_per_minute,
           delay_between_messages = EXCLUDED.delay_between_messages,
           send_time_start = EXCLUDED.send_time_start,
           send_time_end = EXCLUDED.send_time_end,
           utc_offset_minutes = EXCLUDED.utc_offset_minutes,
           auto_process = EXCLUDED.auto_process,
           enable_retries = EXCLUDED.enable_retries,
           log_all_messages = EXCLUDED.log_all_messages,
           max_retries = EXCLUDED.max_retries,
           updated_at = EXCLUDED.updated_at
         RETURNING *",
    )
    .bind(settings.tenant_id)
    .bind(settings.rate_limit_per_minute)
    .bind(settings.delay_between_messages)
    .bind(settings.send_time_start)
    .bind(settings.send_time_end)
    .bind(settings.utc_offset_minutes)
    .bind(settings.auto_process)
    .bind(settings.enable_retries)
    .bind(settings.log_all_messages)
    .bind(settings.max_retries)
    .bind(settings.updated_at)
    .fetch_one(pool)
    .await
}

/// Insert defaults unless a row already exists, then read the row back.
pub async fn find_or_create(
    pool: &PgPool,
    defaults: &TenantQueueSettings,
) -> Result<TenantQueueSettings, sqlx::Error> {
    sqlx::query(
        "INSERT INTO tenant_queue_settings
            (tenant_id, rate_limit_per_minute, delay_between_messages, send_time_start,
             send_time_end, utc_offset_minutes, auto_process, enable_retries,
             log_all_messages, max_retries, updated_at)
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
         ON CONFLICT (tenant_id) DO NOTHING",
    )
    .bind(defaults.tenant_id)
    .bind(defaults.rate_limit_per_minute)
    .bind(defaults.delay_between_messages)
    .bind(defaults.send_time_start)
    .bind(defaults.send_time_end)
    .bind(defaults.utc_offset_minutes)
    .bind(defaults.auto_process)
    .bind(defaults.enable_retries)
    .bind(defaults.log_all_messages)
    .bind(defaults.max_retries)
    .bind(defaults.updated_at)
    .execute(pool)
    .await?;

    sqlx::query_as::<_, TenantQueueSettings>(
        "SELECT * FROM tenant_queue_settings WHERE tenant_id = $1",
    )
    .bind(defaults.tenant_id)
    .fetch_one(pool)
    .await
}
