use library_catalog::{
    Caller, DocumentStatus, Role, UserContext,
    catalog::{
        BindValue, CatalogQuery, DEFAULT_LIMIT, ListBooksQuery, MAX_LIMIT, PageRequest, SortField,
        SortOrder, Visibility,
    },
};
use uuid::Uuid;

fn caller(role: Role) -> Caller {
    Caller::Authenticated(UserContext {
        user_id: Uuid::new_v4(),
        role,
    })
}

fn query(pairs: &[(&str, &str)]) -> ListBooksQuery {
    let mut q = ListBooksQuery::default();
    for (key, value) in pairs {
        let value = Some((*value).to_string());
        match *key {
            "page" => q.page = value,
            "limit" => q.limit = value,
            "category" => q.category = value,
            "language" => q.language = value,
            "author" => q.author = value,
            "search" => q.search = value,
            "sortBy" => q.sort_by = value,
            "sortOrder" => q.sort_order = value,
            "status" => q.status = value,
            other => panic!("unknown key {other}"),
        }
    }
    q
}

#[test]
fn query_string_uses_camel_case_sort_keys() {
    let q: ListBooksQuery =
        serde_json::from_str(r#"{"sortBy":"title","sortOrder":"asc","page":"2"}"#).unwrap();
    assert_eq!(q.sort_by.as_deref(), Some("title"));
    assert_eq!(q.sort_order.as_deref(), Some("asc"));
    assert_eq!(q.page.as_deref(), Some("2"));
}

#[test]
fn anonymous_and_readers_only_ever_see_active_documents() {
    for requested in [None, Some("all"), Some("inactive"), Some("deleted"), Some("' OR 1=1 --")] {
        for who in [Caller::Anonymous, caller(Role::Reader)] {
            let mut raw = ListBooksQuery::default();
            raw.status = requested.map(str::to_string);
            let built = CatalogQuery::build(&raw, &who);

            assert_eq!(built.visibility, Visibility::ActiveOnly);
            assert_eq!(
                built.params().first(),
                Some(&BindValue::Status(DocumentStatus::Active))
            );
            assert!(built.where_clause().starts_with("WHERE b.status = $1"));
        }
    }
}

#[test]
fn admins_may_widen_visibility() {
    for role in [Role::Admin, Role::SuperAdmin] {
        let admin = caller(role);
        assert_eq!(Visibility::resolve(&admin, None), Visibility::NotDeleted);
        assert_eq!(Visibility::resolve(&admin, Some("all")), Visibility::NotDeleted);
        assert_eq!(
            Visibility::resolve(&admin, Some("inactive")),
            Visibility::Exactly(DocumentStatus::Inactive)
        );
        assert_eq!(
            Visibility::resolve(&admin, Some("ACTIVE")),
            Visibility::Exactly(DocumentStatus::Active)
        );
        assert_eq!(
            Visibility::resolve(&admin, Some("'; DROP TABLE books; --")),
            Visibility::NotDeleted
        );
    }
}

#[test]
fn admin_status_filter_is_bound_not_interpolated() {
    let built = CatalogQuery::build(&query(&[("status", "inactive")]), &caller(Role::Admin));
    assert_eq!(built.where_clause(), "WHERE b.status = $1");
    assert_eq!(
        built.params(),
        &[BindValue::Status(DocumentStatus::Inactive)]
    );

    let all = CatalogQuery::build(&query(&[("status", "all")]), &caller(Role::Admin));
    assert_eq!(all.where_clause(), "WHERE b.status <> $1");
    assert_eq!(all.params(), &[BindValue::Status(DocumentStatus::Deleted)]);
}

#[test]
fn sort_allow_list_falls_back_to_created_at() {
    assert_eq!(SortField::parse(Some("title")), SortField::Title);
    assert_eq!(SortField::parse(Some("rating_avg")), SortField::RatingAvg);
    assert_eq!(SortField::parse(None), SortField::CreatedAt);
    for hostile in ["id; DROP TABLE books", "password_hash", "TITLE", "b.title", ""] {
        assert_eq!(SortField::parse(Some(hostile)), SortField::CreatedAt, "{hostile}");
    }
}

#[test]
fn hostile_sort_input_never_reaches_the_sql_text() {
    let hostile = "created_at; DELETE FROM users";
    let built = CatalogQuery::build(
        &query(&[("sortBy", hostile), ("sortOrder", "DESC; DROP TABLE books")]),
        &Caller::Anonymous,
    );
    let sql = built.page_sql();
    assert!(!sql.contains("DELETE"));
    assert!(!sql.contains("DROP"));
    assert!(sql.contains("ORDER BY b.created_at DESC NULLS LAST, b.id DESC"));
}

#[test]
fn sort_order_is_case_insensitive_and_defaults_to_desc() {
    assert_eq!(SortOrder::parse(Some("asc")), SortOrder::Asc);
    assert_eq!(SortOrder::parse(Some("ASC")), SortOrder::Asc);
    assert_eq!(SortOrder::parse(Some("desc")), SortOrder::Desc);
    assert_eq!(SortOrder::parse(Some("sideways")), SortOrder::Desc);
    assert_eq!(SortOrder::parse(None), SortOrder::Desc);
}

#[test]
fn every_present_filter_adds_one_predicate_and_one_parameter() {
    let built = CatalogQuery::build(
        &query(&[
            ("search", "Temur"),
            ("category", "3"),
            ("language", "1"),
            ("author", "42"),
        ]),
        &Caller::Anonymous,
    );

    assert_eq!(
        built.params(),
        &[
            BindValue::Status(DocumentStatus::Active),
            BindValue::Text("%Temur%".into()),
            BindValue::Int(3),
            BindValue::Int(1),
            BindValue::Int(42),
        ]
    );

    let clause = built.where_clause();
    assert!(clause.contains("(b.title ILIKE $2 OR a.name ILIKE $2)"));
    assert!(clause.contains("bc.category_id = $3"));
    assert!(clause.contains("b.language_id = $4"));
    assert!(clause.contains("b.author_id = $5"));
    assert!(!clause.contains("Temur"));
}

#[test]
fn absent_or_malformed_filters_contribute_nothing() {
    let built = CatalogQuery::build(
        &query(&[("search", "   "), ("category", "abc"), ("language", ""), ("author", "1.5")]),
        &Caller::Anonymous,
    );
    assert_eq!(built.params().len(), 1);
    assert_eq!(built.where_clause(), "WHERE b.status = $1");
}

#[test]
fn search_wildcards_are_escaped() {
    let built = CatalogQuery::build(&query(&[("search", "100%_a\\b")]), &Caller::Anonymous);
    assert_eq!(
        built.params().get(1),
        Some(&BindValue::Text("%100\\%\\_a\\\\b%".into()))
    );
}

#[test]
fn count_query_shares_predicates_without_sort_or_paging() {
    let built = CatalogQuery::build(
        &query(&[("search", "Temur"), ("sortBy", "title"), ("page", "3")]),
        &Caller::Anonymous,
    );
    let count = built.count_sql();
    assert!(count.starts_with("SELECT COUNT(*)"));
    assert!(count.ends_with(&built.where_clause()));
    assert!(!count.contains("ORDER BY"));
    assert!(!count.contains("LIMIT"));
}

#[test]
fn page_query_appends_limit_and_offset_placeholders() {
    let built = CatalogQuery::build(
        &query(&[("search", "Temur"), ("page", "3"), ("limit", "10")]),
        &Caller::Anonymous,
    );
    let sql = built.page_sql();
    assert!(sql.ends_with("LIMIT $3 OFFSET $4"));

    let params = built.page_params();
    assert_eq!(params.len(), 4);
    assert_eq!(params[2], BindValue::BigInt(10));
    assert_eq!(params[3], BindValue::BigInt(20));
}

#[test]
fn malformed_pagination_degrades_to_defaults() {
    assert_eq!(PageRequest::from_raw(None, None), PageRequest::default());
    assert_eq!(
        PageRequest::from_raw(Some("0"), Some("-5")),
        PageRequest { page: 1, limit: DEFAULT_LIMIT }
    );
    assert_eq!(
        PageRequest::from_raw(Some("abc"), Some("ten")),
        PageRequest { page: 1, limit: DEFAULT_LIMIT }
    );
    assert_eq!(
        PageRequest::from_raw(Some("2"), Some("100000")),
        PageRequest { page: 2, limit: MAX_LIMIT }
    );
}

#[test]
fn offset_follows_page_and_limit() {
    assert_eq!(PageRequest { page: 1, limit: 20 }.offset(), 0);
    assert_eq!(PageRequest { page: 4, limit: 25 }.offset(), 75);
}

#[test]
fn total_pages_is_ceiling_of_total_over_limit() {
    let page = PageRequest { page: 1, limit: 2 };
    let p = page.pagination(3);
    assert_eq!(p.total_books, 3);
    assert_eq!(p.total_pages, 2);
    assert_eq!(p.current_page, 1);
    assert_eq!(p.limit, 2);

    assert_eq!(PageRequest { page: 1, limit: 20 }.pagination(0).total_pages, 0);
    assert_eq!(PageRequest { page: 1, limit: 20 }.pagination(40).total_pages, 2);
    assert_eq!(PageRequest { page: 1, limit: 20 }.pagination(41).total_pages, 3);
}

#[test]
fn last_page_size_matches_total_modulo_limit() {
    for total in 0..60_i64 {
        for limit in 1..12_i64 {
            let pages = PageRequest { page: 1, limit }.pagination(total).total_pages;
            if total == 0 {
                assert_eq!(pages, 0);
                continue;
            }
            let last = PageRequest { page: pages, limit };
            let rows_on_last = (total - last.offset()).min(limit);
            let expected = if total % limit == 0 { limit } else { total % limit };
            assert_eq!(rows_on_last, expected, "total={total} limit={limit}");
        }
    }
}

#[test]
fn pagination_serialises_in_camel_case() {
    let json = serde_json::to_value(PageRequest { page: 1, limit: 2 }.pagination(3)).unwrap();
    assert_eq!(json["currentPage"], 1);
    assert_eq!(json["totalPages"], 2);
    assert_eq!(json["totalBooks"], 3);
    assert_eq!(json["limit"], 2);
}
