use herald_core::models::ExtractionTier;
use herald_core::traits::ArticleStore;
use herald_db::ArticleRepository;

use crate::integration::common::{sample_article, setup_test_db};

#[tokio::test]
async fn save_and_get_article() {
    let (pool, _container) = setup_test_db().await;
    let repo = ArticleRepository::new(pool);

    let article = sample_article("forexlive", 1);
    assert!(repo.save(&article).await.unwrap());

    let stored = repo
        .get(&article.item_id)
        .await
        .unwrap()
        .expect("Should find the article");

    assert_eq!(stored.item_id, article.item_id);
    assert_eq!(stored.source, "forexlive");
    assert_eq!(stored.title, "Headline 1");
    assert_eq!(stored.content, article.content);
    assert_eq!(stored.content_hash, article.content_hash);
    assert_eq!(stored.tier, ExtractionTier::LightweightFetch);
    assert_eq!(stored.metadata["cleaned_by"], "basic");

    assert!(repo.get("missing").await.unwrap().is_none());
}

#[tokio::test]
async fn duplicate_item_is_ignored() {
    let (pool, _container) = setup_test_db().await;
    let repo = ArticleRepository::new(pool);

    let article = sample_article("fxstreet", 7);
    assert!(repo.save(&article).await.unwrap());
    assert!(!repo.save(&article).await.unwrap());

    // The store interface treats a duplicate as success.
    repo.store(&article).await.unwrap();

    let counts = repo.count_by_source().await.unwrap();
    assert_eq!(counts, vec![("fxstreet".to_string(), 1)]);
}

#[tokio::test]
async fn list_recent_filters_and_orders() {
    let (pool, _container) = setup_test_db().await;
    let repo = ArticleRepository::new(pool);

    for n in 0..3 {
        repo.store(&sample_article("forexlive", n)).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }
    repo.store(&sample_article("babypips", 0)).await.unwrap();

    let all = repo.list_recent(None, 10).await.unwrap();
    assert_eq!(all.len(), 4);
    assert_eq!(all[0].source, "babypips");

    let forexlive = repo.list_recent(Some("forexlive"), 2).await.unwrap();
    let titles: Vec<&str> = forexlive.iter().map(|a| a.title.as_str()).collect();
    assert_eq!(titles, vec!["Headline 2", "Headline 1"]);

    let counts = repo.count_by_source().await.unwrap();
    assert_eq!(
        counts,
        vec![("forexlive".to_string(), 3), ("babypips".to_string(), 1)]
    );
}

#[tokio::test]
async fn health_check_succeeds() {
    let (pool, _container) = setup_test_db().await;
    let repo = ArticleRepository::new(pool);
    repo.health_check().await.unwrap();
}
