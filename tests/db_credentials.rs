#[allow(dead_code)]
mod helpers;

use chrono::Utc;
use poicrawl::db::credentials;
use poicrawl::models::{CredentialLimits, SearchType};
use sqlx::PgPool;

#[sqlx::test]
async fn eligible_excludes_inactive_and_exhausted(pool: PgPool) {
    helpers::insert_credential(&pool, "active-key", true, 0, 0, 0, Some(10)).await;
    helpers::insert_credential(&pool, "inactive-key", false, 0, 0, 0, Some(10)).await;
    helpers::insert_credential(&pool, "exhausted-key", true, 10, 0, 0, Some(10)).await;

    let eligible = credentials::eligible(&pool, SearchType::Keyword).await.unwrap();

    assert_eq!(eligible.len(), 1);
    assert_eq!(eligible[0].key, "active-key");
}

#[sqlx::test]
async fn eligible_is_scoped_per_search_type(pool: PgPool) {
    helpers::insert_credential(&pool, "polygon-only", true, 10, 10, 0, Some(10)).await;

    let keyword_eligible = credentials::eligible(&pool, SearchType::Keyword).await.unwrap();
    let polygon_eligible = credentials::eligible(&pool, SearchType::Polygon).await.unwrap();

    assert!(keyword_eligible.is_empty());
    assert_eq!(polygon_eligible.len(), 1);
}

#[sqlx::test]
async fn increment_usage_bumps_only_the_named_column(pool: PgPool) {
    let id = helpers::insert_credential(&pool, "key", true, 0, 0, 0, None).await;

    credentials::increment_usage(&pool, id, SearchType::Around).await.unwrap();

    let all = credentials::all(&pool).await.unwrap();
    let cred = all.into_iter().find(|c| c.id == id).unwrap();
    assert_eq!(cred.used_around, 1);
    assert_eq!(cred.used_keyword, 0);
}

#[sqlx::test]
async fn mark_exhausted_sets_usage_to_the_limit(pool: PgPool) {
    let id = helpers::insert_credential(&pool, "key", true, 0, 0, 0, Some(50)).await;

    credentials::mark_exhausted(&pool, id, SearchType::Keyword).await.unwrap();

    let all = credentials::all(&pool).await.unwrap();
    let cred = all.into_iter().find(|c| c.id == id).unwrap();
    assert_eq!(cred.used_keyword, 50);
    assert!(!cred.has_quota(SearchType::Keyword));
}

#[sqlx::test]
async fn reset_expired_only_touches_credentials_due_for_reset(pool: PgPool) {
    let stale_id = helpers::insert_credential(&pool, "stale", true, 5, 5, 5, None).await;
    let fresh_id = helpers::insert_credential(&pool, "fresh", true, 5, 5, 5, None).await;

    let boundary = Utc::now();
    sqlx::query("UPDATE credentials SET last_reset = $1 WHERE id = $2")
        .bind(boundary - chrono::Duration::days(2))
        .bind(stale_id)
        .execute(&pool)
        .await
        .unwrap();
    sqlx::query("UPDATE credentials SET last_reset = $1 WHERE id = $2")
        .bind(boundary + chrono::Duration::hours(1))
        .bind(fresh_id)
        .execute(&pool)
        .await
        .unwrap();

    let reset_count = credentials::reset_expired(&pool, boundary, Utc::now()).await.unwrap();
    assert_eq!(reset_count, 1);

    let all = credentials::all(&pool).await.unwrap();
    let stale = all.iter().find(|c| c.id == stale_id).unwrap();
    let fresh = all.iter().find(|c| c.id == fresh_id).unwrap();
    assert_eq!(stale.used_keyword, 0);
    assert_eq!(fresh.used_keyword, 5);
}

#[sqlx::test]
async fn disable_deactivates_and_annotates_description(pool: PgPool) {
    let id = helpers::insert_credential(&pool, "key", true, 0, 0, 0, None).await;

    credentials::disable(&pool, id, "invalid key").await.unwrap();

    let all = credentials::all(&pool).await.unwrap();
    let cred = all.into_iter().find(|c| c.id == id).unwrap();
    assert!(!cred.active);
    assert!(cred.description.unwrap().contains("invalid key"));
}

#[sqlx::test]
async fn find_by_id_returns_none_for_unknown_credential(pool: PgPool) {
    let found = credentials::find_by_id(&pool, 999).await.unwrap();
    assert!(found.is_none());
}

#[sqlx::test]
async fn update_limits_only_touches_the_provided_fields(pool: PgPool) {
    let id = helpers::insert_credential(&pool, "key", true, 0, 0, 0, Some(10)).await;
    sqlx::query("UPDATE credentials SET qps_keyword = 3 WHERE id = $1")
        .bind(id)
        .execute(&pool)
        .await
        .unwrap();

    let limits = CredentialLimits {
        limit_keyword: Some(25),
        limit_around: None,
        limit_polygon: None,
        qps_keyword: None,
        qps_around: None,
        qps_polygon: None,
    };
    credentials::update_limits(&pool, id, &limits).await.unwrap();

    let cred = credentials::find_by_id(&pool, id).await.unwrap().unwrap();
    assert_eq!(cred.limit_keyword, Some(25));
    assert_eq!(cred.limit_around, None);
    assert_eq!(cred.qps_keyword, Some(3));
}
