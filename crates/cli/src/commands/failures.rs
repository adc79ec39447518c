//! Payment failure inspection.

use lux_core::UserId;
use lux_storefront::db::Stores;
use lux_storefront::services::FailureRecorder;
use tracing::info;

use super::connect;

/// List recent payment failures, newest first.
///
/// # Errors
///
/// Returns an error if the database is unreachable or the query fails.
pub async fn list(limit: i64, user: Option<&str>) -> Result<(), Box<dyn std::error::Error>> {
    let pool = connect().await?;
    let recorder = FailureRecorder::new(Stores::postgres(&pool).failures);

    let failures = match user {
        Some(user) => {
            let mut rows = recorder.for_user(&UserId::new(user)).await?;
            rows.truncate(usize::try_from(limit).unwrap_or(0));
            rows
        }
        None => recorder.recent(limit).await?,
    };

    info!(count = failures.len(), "Payment failures");
    for failure in &failures {
        info!(
            id = %failure.id,
            payment = %failure.payment_reference,
            user = failure.user_id.as_ref().map_or("-", |u| u.as_str()),
            amount = %failure.amount,
            currency = %failure.currency,
            code = failure.failure_code.as_deref().unwrap_or("-"),
            at = %failure.created_at,
            "{}",
            failure.failure_reason
        );
    }

    Ok(())
}
