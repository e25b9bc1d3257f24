use forum_core::db::open_db_in_memory;
use forum_core::repo::Order;
use forum_core::{
    CancellationToken, Category, Filter, PersistenceError, Post, SystemActor, Thread, UnitOfWork,
    User,
};
use std::sync::Arc;

fn seeded() -> UnitOfWork {
    let mut uow = UnitOfWork::open(open_db_in_memory().unwrap(), Arc::new(SystemActor)).unwrap();
    let cancel = CancellationToken::new();

    let users = uow.users().unwrap();
    let author = users.add(User::new("ada", "ada@example.com", "h")).unwrap();
    let mut admin = User::new("root", "root@example.com", "h");
    admin.is_admin = true;
    users.add(admin).unwrap();
    let categories = uow.categories().unwrap();
    let mut sort_order = 0;
    let category = categories
        .add_range(["Rust", "Go", "Zig", "Rustaceans"].map(|name| {
            sort_order += 10;
            let mut category = Category::new(name, name.to_lowercase());
            category.sort_order = sort_order;
            category
        }))
        .unwrap()
        .remove(0);
    uow.save_changes(&cancel).unwrap();

    let thread = uow
        .threads()
        .unwrap()
        .add(Thread::new(
            category.id().unwrap(),
            author.id().unwrap(),
            "Lifetimes",
        ))
        .unwrap();
    uow.save_changes(&cancel).unwrap();

    let posts = uow.posts().unwrap();
    let root = posts
        .add(Post::new(thread.id().unwrap(), author.id().unwrap(), "first"))
        .unwrap();
    uow.save_changes(&cancel).unwrap();
    let mut reply = Post::new(thread.id().unwrap(), author.id().unwrap(), "reply");
    reply.parent_post_id = root.id();
    posts.add(reply).unwrap();
    uow.save_changes(&cancel).unwrap();
    uow
}

#[test]
fn comparison_and_like_filters_select_matching_rows() {
    let uow = seeded();
    let categories = uow.categories().unwrap();

    let rusty = categories
        .query(Filter::like("name", "rust%"))
        .unwrap()
        .fetch()
        .unwrap();
    let names: Vec<_> = rusty.iter().map(|category| category.name.as_str()).collect();
    assert_eq!(names, ["Rust", "Rustaceans"]);

    let middle = categories
        .query(Filter::gt("sort_order", 10).and(Filter::le("sort_order", 30)))
        .unwrap()
        .count()
        .unwrap();
    assert_eq!(middle, 2);

    let admins = uow
        .users()
        .unwrap()
        .query(Filter::eq("is_admin", true))
        .unwrap()
        .fetch()
        .unwrap();
    assert_eq!(admins.len(), 1);
    assert_eq!(admins[0].username, "root");
}

#[test]
fn in_list_not_and_null_checks_compose() {
    let uow = seeded();
    let categories = uow.categories().unwrap();

    let picked = categories
        .query(Filter::in_list("slug", ["go", "zig", "cobol"]).and(Filter::ne("slug", "zig")))
        .unwrap()
        .fetch()
        .unwrap();
    assert_eq!(picked.len(), 1);
    assert_eq!(picked[0].slug, "go");

    let excluded = categories
        .query(Filter::in_list("slug", ["go", "zig"]).not())
        .unwrap()
        .count()
        .unwrap();
    assert_eq!(excluded, 2);

    let posts = uow.posts().unwrap();
    let top_level = posts.query(Filter::is_null("parent_post_id")).unwrap();
    let replies = posts.query(Filter::is_not_null("parent_post_id")).unwrap();
    assert_eq!(top_level.first().unwrap().unwrap().body, "first");
    assert_eq!(replies.first().unwrap().unwrap().body, "reply");
}

#[test]
fn ordering_and_paging_are_deterministic() {
    let uow = seeded();
    let query = uow
        .categories()
        .unwrap()
        .all()
        .unwrap()
        .order_by("sort_order", Order::Desc)
        .unwrap();

    let slugs = |page: Vec<Category>| page.into_iter().map(|c| c.slug).collect::<Vec<_>>();
    assert_eq!(
        slugs(query.clone().limit(2).fetch().unwrap()),
        ["rustaceans", "zig"]
    );
    assert_eq!(
        slugs(query.clone().limit(2).offset(2).fetch().unwrap()),
        ["go", "rust"]
    );
    assert_eq!(slugs(query.clone().offset(3).fetch().unwrap()), ["rust"]);
    assert_eq!(query.limit(3).count().unwrap(), 3);
}

#[test]
fn queries_are_re_evaluated_on_every_enumeration() {
    let mut uow = seeded();
    let categories = uow.categories().unwrap();
    let query = categories.query(Filter::like("slug", "%o%")).unwrap();
    assert_eq!(query.count().unwrap(), 1);

    categories.add(Category::new("Mojo", "mojo")).unwrap();
    assert_eq!(query.count().unwrap(), 1);
    uow.save_changes(&CancellationToken::new()).unwrap();
    assert_eq!(query.count().unwrap(), 2);
    assert_eq!(query.fetch().unwrap().len(), 2);
}

#[test]
fn malformed_predicates_fail_before_store_access() {
    let uow = seeded();
    let users = uow.users().unwrap();

    for filter in [
        Filter::eq("password", "secret"),
        Filter::in_list::<i64>("id", []),
        Filter::like("email", ""),
        Filter::any_of([]),
        Filter::eq("username", "ada").and(Filter::gt("karma", 3)),
    ] {
        let err = users.query(filter).unwrap_err();
        assert!(matches!(err, PersistenceError::InvalidQuery(_)), "{err}");
    }

    let err = users
        .all()
        .unwrap()
        .order_by("username; DROP TABLE users", Order::Asc)
        .unwrap_err();
    assert!(matches!(err, PersistenceError::InvalidQuery(_)));
}

#[test]
fn audit_columns_are_filterable() {
    let uow = seeded();
    let posts = uow.posts().unwrap();
    let all = posts.all().unwrap().fetch().unwrap();
    let newest_id = all.iter().filter_map(|post| post.audit.id).max().unwrap();

    let newest = posts
        .query(Filter::eq("id", newest_id))
        .unwrap()
        .first()
        .unwrap()
        .unwrap();
    assert_eq!(newest.body, "reply");
    assert_eq!(
        posts
            .query(Filter::is_null("created_user_id"))
            .unwrap()
            .count()
            .unwrap(),
        2
    );
}
