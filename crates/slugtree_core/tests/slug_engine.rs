mod common;

use common::{add_node, seed_site, seed_type, slug_of, EN};
use pretty_assertions::assert_eq;
use slugtree_core::repo::content_repo::ContentRepository;
use slugtree_core::repo::slug_repo::SlugRepository;
use slugtree_core::{
    ContentNode, ContentType, NodeVariant, OperationContext, PinOutcome, RebuildOutcome,
    RebuildRequest, RebuildTarget, Site, SlugConfig, SlugEngine, SlugError,
};

fn engine() -> SlugEngine {
    SlugEngine::open_in_memory(SlugConfig::new("test-app").unwrap()).unwrap()
}

fn seed(engine: &SlugEngine, pattern: &str) -> (Site, ContentType) {
    engine
        .content(|repo| Ok((seed_site(repo, "main"), seed_type(repo, "page", pattern))))
        .unwrap()
}

fn node(
    engine: &SlugEngine,
    site: &Site,
    parent: Option<&ContentNode>,
    content_type: &ContentType,
    alias: &str,
) -> ContentNode {
    engine
        .content(|repo| Ok(add_node(repo, site, parent, content_type, alias, alias)))
        .unwrap()
}

fn slug(engine: &SlugEngine, node: &ContentNode) -> Option<String> {
    engine.slugs(|repo| Ok(slug_of(repo, node))).unwrap()
}

fn rebuild(engine: &SlugEngine, request: RebuildRequest) -> Result<RebuildOutcome, SlugError> {
    engine.rebuild_scope(&mut OperationContext::new(), request)
}

#[test]
fn rename_scenario_updates_subtree_and_leaves_siblings() {
    let engine = engine();
    let (site, page) = seed(&engine, "/{NodeAliasPath}");
    let about = node(&engine, &site, None, &page, "about");
    let team = node(&engine, &site, Some(&about), &page, "team");
    let contact = node(&engine, &site, None, &page, "contact");

    let outcome = rebuild(&engine, RebuildRequest::immediate(RebuildTarget::Site(site.site_id)))
        .unwrap();
    assert!(matches!(outcome, RebuildOutcome::Committed(ref report) if report.written == 3));

    engine
        .content(|repo| Ok(repo.rename_alias(about.node_id, "about-us")?))
        .unwrap();
    let outcome =
        rebuild(&engine, RebuildRequest::immediate(RebuildTarget::Node(about.node_id))).unwrap();
    assert!(matches!(outcome, RebuildOutcome::Committed(ref report) if report.written == 2));

    assert_eq!(slug(&engine, &about).as_deref(), Some("/about-us"));
    assert_eq!(slug(&engine, &team).as_deref(), Some("/about-us/team"));
    assert_eq!(slug(&engine, &contact).as_deref(), Some("/contact"));

    let again =
        rebuild(&engine, RebuildRequest::immediate(RebuildTarget::Site(site.site_id))).unwrap();
    assert_eq!(again, RebuildOutcome::NoChanges);
}

#[test]
fn second_contact_fails_with_collision_and_writes_nothing() {
    let engine = engine();
    let (site, page) = seed(&engine, "/{NodeAlias}");
    let company = node(&engine, &site, None, &page, "company");
    let first = node(&engine, &site, None, &page, "contact");
    rebuild(&engine, RebuildRequest::immediate(RebuildTarget::Site(site.site_id))).unwrap();

    let second = node(&engine, &site, Some(&company), &page, "contact");
    let err = rebuild(&engine, RebuildRequest::immediate(RebuildTarget::Node(second.node_id)))
        .unwrap_err();

    match err {
        SlugError::Collision { conflicts } => {
            assert_eq!(conflicts.len(), 1);
            assert_eq!(conflicts[0].holder, first.node_id);
            assert_eq!(conflicts[0].blocked, second.node_id);
            assert_eq!(conflicts[0].slug, "/contact");
            assert!(!conflicts[0].holder_is_custom);
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(slug(&engine, &first).as_deref(), Some("/contact"));
    assert_eq!(slug(&engine, &second), None);
}

#[test]
fn synchronous_conflict_leaves_every_assignment_unchanged() {
    let engine = engine();
    let (site, page) = seed(&engine, "/{DocumentName}");
    let alpha = node(&engine, &site, None, &page, "alpha");
    let beta = node(&engine, &site, None, &page, "beta");
    let gamma = node(&engine, &site, None, &page, "gamma");
    rebuild(&engine, RebuildRequest::immediate(RebuildTarget::Site(site.site_id))).unwrap();

    engine
        .content(|repo| {
            repo.upsert_variant(alpha.node_id, &NodeVariant::new(EN, "Alpha Two"))?;
            repo.upsert_variant(gamma.node_id, &NodeVariant::new(EN, "Beta"))?;
            Ok(())
        })
        .unwrap();
    let err = rebuild(&engine, RebuildRequest::immediate(RebuildTarget::Site(site.site_id)))
        .unwrap_err();
    assert!(matches!(err, SlugError::Collision { .. }));

    assert_eq!(slug(&engine, &alpha).as_deref(), Some("/alpha"));
    assert_eq!(slug(&engine, &beta).as_deref(), Some("/beta"));
    assert_eq!(slug(&engine, &gamma).as_deref(), Some("/gamma"));
}

#[test]
fn skip_conflicts_mode_writes_the_rest() {
    let config = SlugConfig::new("test-app")
        .unwrap()
        .with_abort_on_conflict(false);
    let engine = SlugEngine::open_in_memory(config).unwrap();
    let (site, page) = seed(&engine, "/{DocumentName}");
    let alpha = node(&engine, &site, None, &page, "alpha");
    let beta = node(&engine, &site, None, &page, "beta");
    rebuild(&engine, RebuildRequest::immediate(RebuildTarget::Site(site.site_id))).unwrap();

    engine
        .content(|repo| {
            repo.upsert_variant(alpha.node_id, &NodeVariant::new(EN, "Alpha Two"))?;
            repo.upsert_variant(beta.node_id, &NodeVariant::new(EN, "Alpha Two"))?;
            Ok(())
        })
        .unwrap();
    let outcome =
        rebuild(&engine, RebuildRequest::immediate(RebuildTarget::Site(site.site_id))).unwrap();

    let report = match outcome {
        RebuildOutcome::Committed(report) => report,
        other => panic!("expected committed outcome, got {other:?}"),
    };
    assert_eq!(report.written, 1);
    assert_eq!(report.conflicts.len(), 1);
    assert_eq!(report.conflicts[0].holder, alpha.node_id);
    assert_eq!(slug(&engine, &alpha).as_deref(), Some("/alpha-two"));
    assert_eq!(slug(&engine, &beta).as_deref(), Some("/beta"));
}

#[test]
fn swapping_slugs_inside_one_change_set_is_not_a_conflict() {
    let engine = engine();
    let (site, page) = seed(&engine, "/{DocumentName}");
    let left = node(&engine, &site, None, &page, "left");
    let right = node(&engine, &site, None, &page, "right");
    rebuild(&engine, RebuildRequest::immediate(RebuildTarget::Site(site.site_id))).unwrap();

    engine
        .content(|repo| {
            repo.upsert_variant(left.node_id, &NodeVariant::new(EN, "right"))?;
            repo.upsert_variant(right.node_id, &NodeVariant::new(EN, "left"))?;
            Ok(())
        })
        .unwrap();
    let outcome =
        rebuild(&engine, RebuildRequest::immediate(RebuildTarget::Site(site.site_id))).unwrap();
    assert!(matches!(outcome, RebuildOutcome::Committed(ref report) if report.written == 2));
    assert_eq!(slug(&engine, &left).as_deref(), Some("/right"));
    assert_eq!(slug(&engine, &right).as_deref(), Some("/left"));
}

#[test]
fn generated_slug_equal_to_custom_slug_is_rejected() {
    let engine = engine();
    let (site, page) = seed(&engine, "/{NodeAlias}");
    let landing = node(&engine, &site, None, &page, "landing");
    let promo = node(&engine, &site, None, &page, "promo");
    rebuild(&engine, RebuildRequest::immediate(RebuildTarget::Site(site.site_id))).unwrap();

    let pinned = engine
        .pin_custom_slug(&mut OperationContext::new(), landing.node_id, EN, "/Summer Sale")
        .unwrap();
    assert_eq!(
        pinned,
        PinOutcome::Pinned {
            slug: "/summer-sale".to_string(),
            displaced: Vec::new()
        }
    );

    engine
        .content(|repo| Ok(repo.rename_alias(promo.node_id, "summer-sale")?))
        .unwrap();
    let err = rebuild(&engine, RebuildRequest::immediate(RebuildTarget::Node(promo.node_id)))
        .unwrap_err();
    assert!(matches!(
        err,
        SlugError::Collision { ref conflicts } if conflicts[0].holder_is_custom
    ));
    assert_eq!(slug(&engine, &promo).as_deref(), Some("/promo"));
}

#[test]
fn custom_slug_survives_rebuild_unless_overwritten() {
    let engine = engine();
    let (site, page) = seed(&engine, "/{NodeAlias}");
    let about = node(&engine, &site, None, &page, "about");
    rebuild(&engine, RebuildRequest::immediate(RebuildTarget::Site(site.site_id))).unwrap();
    engine
        .pin_custom_slug(&mut OperationContext::new(), about.node_id, EN, "/who-we-are")
        .unwrap();

    let outcome =
        rebuild(&engine, RebuildRequest::immediate(RebuildTarget::Site(site.site_id))).unwrap();
    assert_eq!(outcome, RebuildOutcome::NoChanges);
    assert_eq!(slug(&engine, &about).as_deref(), Some("/who-we-are"));

    rebuild(
        &engine,
        RebuildRequest::immediate(RebuildTarget::Site(site.site_id)).overwriting_custom(),
    )
    .unwrap();
    let assignment = engine
        .slugs(|repo| Ok(repo.get_assignment(about.node_id, EN)?))
        .unwrap()
        .unwrap();
    assert_eq!(assignment.slug, "/about");
    assert!(!assignment.is_custom);
}

#[test]
fn pin_displaces_generated_holder_and_rejects_custom_holder() {
    let engine = engine();
    let (site, page) = seed(&engine, "/{NodeAlias}");
    let contact = node(&engine, &site, None, &page, "contact");
    let support = node(&engine, &site, None, &page, "support");
    let help = node(&engine, &site, None, &page, "help");
    rebuild(&engine, RebuildRequest::immediate(RebuildTarget::Site(site.site_id))).unwrap();

    let outcome = engine
        .pin_custom_slug(&mut OperationContext::new(), support.node_id, EN, "/contact")
        .unwrap();
    assert_eq!(
        outcome,
        PinOutcome::Pinned {
            slug: "/contact".to_string(),
            displaced: vec![contact.node_id]
        }
    );
    assert_eq!(slug(&engine, &contact), None);

    let err = engine
        .pin_custom_slug(&mut OperationContext::new(), help.node_id, EN, "contact")
        .unwrap_err();
    assert!(matches!(err, SlugError::Collision { ref conflicts } if conflicts[0].holder == support.node_id));

    let blank = engine
        .pin_custom_slug(&mut OperationContext::new(), help.node_id, EN, "   ")
        .unwrap_err();
    assert!(matches!(blank, SlugError::InvalidSlug { .. }));
}

#[test]
fn clear_custom_slug_regenerates_from_pattern() {
    let engine = engine();
    let (site, page) = seed(&engine, "/{NodeAlias}");
    let about = node(&engine, &site, None, &page, "about");
    let mut ctx = OperationContext::new();
    engine
        .pin_custom_slug(&mut ctx, about.node_id, EN, "/company")
        .unwrap();

    let outcome = engine
        .clear_custom_slug(&mut ctx, about.node_id, EN, true)
        .unwrap();
    assert!(matches!(outcome, RebuildOutcome::Committed(_)));
    assert_eq!(slug(&engine, &about).as_deref(), Some("/about"));
}

#[test]
fn clear_custom_slug_keeps_pin_when_regenerated_slug_collides() {
    let engine = engine();
    let (site, page) = seed(&engine, "/{NodeAlias}");
    let about = node(&engine, &site, None, &page, "about");
    rebuild(&engine, RebuildRequest::immediate(RebuildTarget::Site(site.site_id))).unwrap();
    engine
        .pin_custom_slug(&mut OperationContext::new(), about.node_id, EN, "/company")
        .unwrap();

    let archive = node(&engine, &site, None, &page, "archive");
    let copy = node(&engine, &site, Some(&archive), &page, "about");
    rebuild(&engine, RebuildRequest::immediate(RebuildTarget::Node(copy.node_id))).unwrap();
    assert_eq!(slug(&engine, &copy).as_deref(), Some("/about"));

    let err = engine
        .clear_custom_slug(&mut OperationContext::new(), about.node_id, EN, true)
        .unwrap_err();
    assert!(matches!(err, SlugError::Collision { .. }));

    let assignment = engine
        .slugs(|repo| Ok(repo.get_assignment(about.node_id, EN)?))
        .unwrap()
        .unwrap();
    assert!(assignment.is_custom);
    assert_eq!(assignment.slug, "/company");
    assert_eq!(slug(&engine, &copy).as_deref(), Some("/about"));
}

#[test]
fn set_url_pattern_restores_previous_pattern_on_collision() {
    let engine = engine();
    let (site, page) = seed(&engine, "/{NodeAlias}");
    let first = node(&engine, &site, None, &page, "a");
    let second = node(&engine, &site, None, &page, "b");
    rebuild(&engine, RebuildRequest::immediate(RebuildTarget::Site(site.site_id))).unwrap();

    let err = engine
        .set_url_pattern(&mut OperationContext::new(), page.type_id, "/same", true)
        .unwrap_err();
    assert!(matches!(err, SlugError::Collision { .. }));

    let stored = engine
        .content(|repo| Ok(repo.get_content_type(page.type_id)?))
        .unwrap()
        .unwrap();
    assert_eq!(stored.url_pattern, "/{NodeAlias}");
    assert_eq!(slug(&engine, &first).as_deref(), Some("/a"));
    assert_eq!(slug(&engine, &second).as_deref(), Some("/b"));

    let outcome = rebuild(
        &engine,
        RebuildRequest::immediate(RebuildTarget::ContentType(page.type_id)),
    )
    .unwrap();
    assert_eq!(outcome, RebuildOutcome::NoChanges);
}

#[test]
fn content_type_created_later_widens_rebuild_scope() {
    let engine = engine();
    let (site, folder) = seed(&engine, "/{NodeAlias}");
    let about = node(&engine, &site, None, &folder, "about");
    rebuild(&engine, RebuildRequest::immediate(RebuildTarget::Node(about.node_id))).unwrap();

    assert!(matches!(
        engine.create_content_type("broken", "/{Macro}"),
        Err(SlugError::Pattern(_))
    ));
    let page = engine
        .create_content_type("page", "{ParentUrl}/{NodeAlias}")
        .unwrap();
    let team = node(&engine, &site, Some(&about), &page, "team");
    rebuild(&engine, RebuildRequest::immediate(RebuildTarget::Node(team.node_id))).unwrap();
    assert_eq!(slug(&engine, &team).as_deref(), Some("/about/team"));

    engine
        .content(|repo| Ok(repo.rename_alias(about.node_id, "about-us")?))
        .unwrap();
    let outcome =
        rebuild(&engine, RebuildRequest::immediate(RebuildTarget::Node(about.node_id))).unwrap();
    assert!(matches!(outcome, RebuildOutcome::Committed(ref report) if report.written == 2));
    assert_eq!(slug(&engine, &team).as_deref(), Some("/about-us/team"));
}

#[test]
fn set_url_pattern_validates_and_rebuilds_type() {
    let engine = engine();
    let (site, page) = seed(&engine, "/{NodeAlias}");
    let about = node(&engine, &site, None, &page, "about");
    let team = node(&engine, &site, Some(&about), &page, "team");
    rebuild(&engine, RebuildRequest::immediate(RebuildTarget::Site(site.site_id))).unwrap();
    assert_eq!(slug(&engine, &team).as_deref(), Some("/team"));

    let err = engine
        .set_url_pattern(&mut OperationContext::new(), page.type_id, "/{Macro}", true)
        .unwrap_err();
    assert!(matches!(err, SlugError::Pattern(_)));

    let outcome = engine
        .set_url_pattern(
            &mut OperationContext::new(),
            page.type_id,
            "/pages{NodeAliasPath}",
            true,
        )
        .unwrap();
    assert!(matches!(outcome, RebuildOutcome::Committed(ref report) if report.written == 2));
    assert_eq!(slug(&engine, &about).as_deref(), Some("/pages/about"));
    assert_eq!(slug(&engine, &team).as_deref(), Some("/pages/about/team"));
}

#[test]
fn operation_context_makes_repeated_triggers_no_ops() {
    let engine = engine();
    let (site, page) = seed(&engine, "/{NodeAlias}");
    let about = node(&engine, &site, None, &page, "about");
    let mut ctx = OperationContext::new();

    let first = engine
        .rebuild_scope(&mut ctx, RebuildRequest::immediate(RebuildTarget::Node(about.node_id)))
        .unwrap();
    assert!(matches!(first, RebuildOutcome::Committed(_)));

    let repeated = engine
        .rebuild_scope(&mut ctx, RebuildRequest::immediate(RebuildTarget::Node(about.node_id)))
        .unwrap();
    assert_eq!(repeated, RebuildOutcome::AlreadyHandled);

    let pin = engine
        .pin_custom_slug(&mut ctx, about.node_id, EN, "/x")
        .unwrap();
    assert!(matches!(pin, PinOutcome::Pinned { .. }));
    let pin_again = engine
        .pin_custom_slug(&mut ctx, about.node_id, EN, "/y")
        .unwrap();
    assert_eq!(pin_again, PinOutcome::AlreadyHandled);
    assert_eq!(slug(&engine, &about).as_deref(), Some("/x"));
}

#[test]
fn rebuild_of_missing_node_reports_not_found() {
    let engine = engine();
    let err = rebuild(&engine, RebuildRequest::immediate(RebuildTarget::Node(999))).unwrap_err();
    assert!(matches!(err, SlugError::NodeNotFound(999)));
}
