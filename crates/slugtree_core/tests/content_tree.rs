mod common;

use common::{add_node, seed_site, seed_type, DE, EN};
use slugtree_core::db::open_db_in_memory;
use slugtree_core::repo::content_repo::{ContentRepository, SqliteContentRepository};
use slugtree_core::{NodeVariant, RepoError};

#[test]
fn create_node_derives_order_level_and_alias_path() {
    let conn = open_db_in_memory().unwrap();
    let repo = SqliteContentRepository::try_new(&conn).unwrap();
    let site = seed_site(&repo, "main");
    let page = seed_type(&repo, "page", "/{NodeAliasPath}");

    let about = add_node(&repo, &site, None, &page, "about", "About");
    let contact = add_node(&repo, &site, None, &page, "contact", "Contact");
    let team = add_node(&repo, &site, Some(&about), &page, "team", "Team");

    assert_eq!(about.node_order, 0);
    assert_eq!(contact.node_order, 1);
    assert_eq!(team.node_level, 1);
    assert_eq!(team.alias_path, "/about/team");

    let top_level: Vec<i64> = repo
        .list_children(site.site_id, None)
        .unwrap()
        .into_iter()
        .map(|node| node.node_id)
        .collect();
    assert_eq!(top_level, vec![about.node_id, contact.node_id]);
}

#[test]
fn create_site_records_sorted_cultures() {
    let conn = open_db_in_memory().unwrap();
    let repo = SqliteContentRepository::try_new(&conn).unwrap();

    let site = repo.create_site("multi", Some(EN), &[EN, DE]).unwrap();
    assert_eq!(site.cultures, vec![DE.to_string(), EN.to_string()]);
    assert_eq!(site.default_culture.as_deref(), Some(EN));
    assert_eq!(repo.list_sites().unwrap().len(), 1);
}

#[test]
fn upsert_variant_round_trips_fields() {
    let conn = open_db_in_memory().unwrap();
    let repo = SqliteContentRepository::try_new(&conn).unwrap();
    let site = seed_site(&repo, "main");
    let product = seed_type(&repo, "product", "/p/{Field:Sku}");
    let node = add_node(&repo, &site, None, &product, "widget", "Widget");

    repo.upsert_variant(
        node.node_id,
        &NodeVariant::new(EN, "Widget XL").with_field("Sku", "W-100"),
    )
    .unwrap();

    let stored = repo.get_node(node.node_id).unwrap().unwrap();
    let variant = stored.variants.get(EN).unwrap();
    assert_eq!(variant.document_name, "Widget XL");
    assert_eq!(variant.fields.get("Sku").map(String::as_str), Some("W-100"));
}

#[test]
fn rename_alias_rewrites_subtree_paths() {
    let conn = open_db_in_memory().unwrap();
    let repo = SqliteContentRepository::try_new(&conn).unwrap();
    let site = seed_site(&repo, "main");
    let page = seed_type(&repo, "page", "/{NodeAliasPath}");
    let about = add_node(&repo, &site, None, &page, "about", "About");
    let team = add_node(&repo, &site, Some(&about), &page, "team", "Team");
    let lead = add_node(&repo, &site, Some(&team), &page, "lead", "Lead");
    let contact = add_node(&repo, &site, None, &page, "contact", "Contact");

    repo.rename_alias(about.node_id, "about-us").unwrap();

    let path = |id| repo.get_node(id).unwrap().unwrap().alias_path;
    assert_eq!(path(about.node_id), "/about-us");
    assert_eq!(path(team.node_id), "/about-us/team");
    assert_eq!(path(lead.node_id), "/about-us/team/lead");
    assert_eq!(path(contact.node_id), "/contact");
}

#[test]
fn move_node_updates_levels_and_reorders_siblings() {
    let conn = open_db_in_memory().unwrap();
    let repo = SqliteContentRepository::try_new(&conn).unwrap();
    let site = seed_site(&repo, "main");
    let page = seed_type(&repo, "page", "/{NodeAliasPath}");
    let about = add_node(&repo, &site, None, &page, "about", "About");
    let blog = add_node(&repo, &site, None, &page, "blog", "Blog");
    let news = add_node(&repo, &site, None, &page, "news", "News");
    let post = add_node(&repo, &site, Some(&news), &page, "post", "Post");

    repo.move_node(news.node_id, Some(blog.node_id), None)
        .unwrap();

    let moved = repo.get_node(news.node_id).unwrap().unwrap();
    assert_eq!(moved.alias_path, "/blog/news");
    assert_eq!(moved.node_level, 1);
    let child = repo.get_node(post.node_id).unwrap().unwrap();
    assert_eq!(child.alias_path, "/blog/news/post");
    assert_eq!(child.node_level, 2);

    repo.move_node(blog.node_id, None, Some(0)).unwrap();
    let order: Vec<(i64, i64)> = repo
        .list_children(site.site_id, None)
        .unwrap()
        .into_iter()
        .map(|node| (node.node_id, node.node_order))
        .collect();
    assert_eq!(order, vec![(blog.node_id, 0), (about.node_id, 1)]);
}

#[test]
fn move_node_rejects_cycles() {
    let conn = open_db_in_memory().unwrap();
    let repo = SqliteContentRepository::try_new(&conn).unwrap();
    let site = seed_site(&repo, "main");
    let page = seed_type(&repo, "page", "/{NodeAliasPath}");
    let about = add_node(&repo, &site, None, &page, "about", "About");
    let team = add_node(&repo, &site, Some(&about), &page, "team", "Team");

    let err = repo
        .move_node(about.node_id, Some(team.node_id), None)
        .unwrap_err();
    assert!(matches!(
        err,
        RepoError::CycleDetected { node_id, parent_id }
            if node_id == about.node_id && parent_id == team.node_id
    ));

    let err = repo
        .move_node(about.node_id, Some(about.node_id), None)
        .unwrap_err();
    assert!(matches!(err, RepoError::CycleDetected { .. }));
}

#[test]
fn move_node_rejects_parent_from_other_site() {
    let conn = open_db_in_memory().unwrap();
    let repo = SqliteContentRepository::try_new(&conn).unwrap();
    let main = seed_site(&repo, "main");
    let shop = seed_site(&repo, "shop");
    let page = seed_type(&repo, "page", "/{NodeAlias}");
    let about = add_node(&repo, &main, None, &page, "about", "About");
    let cart = add_node(&repo, &shop, None, &page, "cart", "Cart");

    let err = repo
        .move_node(about.node_id, Some(cart.node_id), None)
        .unwrap_err();
    assert!(matches!(err, RepoError::SiteMismatch { .. }));
}

#[test]
fn update_url_pattern_requires_existing_type() {
    let conn = open_db_in_memory().unwrap();
    let repo = SqliteContentRepository::try_new(&conn).unwrap();

    let err = repo.update_url_pattern(404, "/{NodeAlias}").unwrap_err();
    assert!(matches!(err, RepoError::ContentTypeNotFound(404)));
}
