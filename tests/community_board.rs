//! 社区板块的跨模块集成测试
//!
//! 覆盖单模块测试不便表达的性质：文件库上的完整流程、
//! 并发 toggle 下存储层唯一约束的兜底、级联删除的先子后父顺序。

use std::sync::Arc;
use std::thread;

use deep_teacher_lib::community::{CommentService, PostService};
use deep_teacher_lib::database::Database;
use deep_teacher_lib::identity::IdentityStore;
use deep_teacher_lib::models::{
    CommentCreateRequest, PostCreateRequest, PostListQuery, SortMode, UserRole,
};

struct Harness {
    db: Arc<Database>,
    posts: Arc<PostService>,
    comments: Arc<CommentService>,
    _dir: tempfile::TempDir,
}

fn harness() -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let db = Arc::new(Database::new(&dir.path().join("board.db")).unwrap());
    let identity = Arc::new(IdentityStore::new(Arc::clone(&db)));
    identity
        .upsert_user("teacher-1", "tanaka", Some("田中先生"), UserRole::Teacher)
        .unwrap();
    identity
        .upsert_user("teacher-2", "suzuki", None, UserRole::Teacher)
        .unwrap();
    identity
        .upsert_user("admin-1", "moderator", None, UserRole::Admin)
        .unwrap();
    Harness {
        posts: Arc::new(PostService::new(Arc::clone(&db), Arc::clone(&identity))),
        comments: Arc::new(CommentService::new(Arc::clone(&db), identity)),
        db,
        _dir: dir,
    }
}

fn create_post(h: &Harness, author: &str, title: &str) -> String {
    std::thread::sleep(std::time::Duration::from_millis(2));
    h.posts
        .create(
            author,
            &PostCreateRequest {
                title: title.to_string(),
                content: format!("{} について相談させてください。", title),
                tags: vec!["advice".to_string()],
            },
        )
        .unwrap()
        .id
}

#[test]
fn test_toggle_parity_over_many_calls() {
    let h = harness();
    let post_id = create_post(&h, "teacher-1", "連打テスト");

    // N 回 toggle 後の状態は N mod 2 == 1
    for n in 1..=7 {
        let result = h.posts.toggle_upvote(&post_id, "teacher-2").unwrap();
        assert_eq!(result.user_has_upvoted, n % 2 == 1, "after {} toggles", n);
        assert!(result.upvotes >= 0);
    }
    let detail = h.posts.get(&post_id, "teacher-2").unwrap();
    assert_eq!(detail.upvotes, 1);
    assert!(detail.user_has_upvoted);
}

#[test]
fn test_concurrent_toggles_cannot_duplicate_vote_rows() {
    // check-then-act の競合でカウンタはずれ得るが、
    // 票の行は存储层の一意制約で 1 行を超えない
    let h = harness();
    let post_id = create_post(&h, "teacher-1", "並行テスト");

    let mut handles = Vec::new();
    for _ in 0..8 {
        let posts = Arc::clone(&h.posts);
        let post_id = post_id.clone();
        handles.push(thread::spawn(move || {
            posts.toggle_upvote(&post_id, "teacher-2").unwrap();
        }));
    }
    for handle in handles {
        handle.join().unwrap();
    }

    let conn = h.db.get_conn_safe().unwrap();
    let vote_rows: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM upvotes WHERE user_id = 'teacher-2' AND target_id = ?1",
            [&post_id],
            |r| r.get(0),
        )
        .unwrap();
    assert!(vote_rows <= 1, "unique constraint must cap vote rows at 1");

    let upvotes: i64 = conn
        .query_row("SELECT upvotes FROM posts WHERE id = ?1", [&post_id], |r| {
            r.get(0)
        })
        .unwrap();
    // カウンタは负にならない
    assert!(upvotes >= 0);
}

#[test]
fn test_pinned_first_across_all_sort_modes() {
    let h = harness();
    let a = create_post(&h, "teacher-1", "古い");
    let b = create_post(&h, "teacher-1", "人気");
    let c = create_post(&h, "teacher-1", "新しい");

    // b に票と閲覧を集める
    h.posts.toggle_upvote(&b, "teacher-1").unwrap();
    h.posts.toggle_upvote(&b, "teacher-2").unwrap();
    h.posts.get(&b, "teacher-1").unwrap();
    // a を置顶
    h.posts.set_pinned(&a, "admin-1", true).unwrap();

    for sort in [
        SortMode::Newest,
        SortMode::Upvotes,
        SortMode::Views,
        SortMode::Active,
    ] {
        let page = h
            .posts
            .list(
                "teacher-1",
                &PostListQuery {
                    sort: Some(sort),
                    ..Default::default()
                },
            )
            .unwrap();
        assert_eq!(
            page.posts[0].id, a,
            "pinned post must lead under {:?}",
            sort
        );
        assert!(page.posts.len() == 3);
    }

    // 組内は要求モードの比較器: upvotes では b が非置顶組の先頭
    let page = h
        .posts
        .list(
            "teacher-1",
            &PostListQuery {
                sort: Some(SortMode::Upvotes),
                ..Default::default()
            },
        )
        .unwrap();
    assert_eq!(page.posts[1].id, b);
    assert_eq!(page.posts[2].id, c);
}

#[test]
fn test_post_delete_cascade_order_children_first() {
    let h = harness();
    let post_id = create_post(&h, "teacher-1", "削除フロー");
    let root = h
        .comments
        .create(
            &post_id,
            "teacher-2",
            &CommentCreateRequest {
                content: "根評論".to_string(),
                parent_comment_id: None,
            },
        )
        .unwrap();
    h.comments
        .create(
            &post_id,
            "teacher-1",
            &CommentCreateRequest {
                content: "返信".to_string(),
                parent_comment_id: Some(root.id.clone()),
            },
        )
        .unwrap();
    h.comments.toggle_upvote(&root.id, "teacher-1").unwrap();
    h.posts.toggle_upvote(&post_id, "teacher-2").unwrap();

    h.posts.delete(&post_id, "teacher-1").unwrap();

    // 評論・評論票・帖子票・帖子のすべてが消えている
    let conn = h.db.get_conn_safe().unwrap();
    for (what, sql) in [
        ("comments", "SELECT COUNT(*) FROM comments"),
        ("upvotes", "SELECT COUNT(*) FROM upvotes"),
        ("posts", "SELECT COUNT(*) FROM posts"),
    ] {
        let count: i64 = conn.query_row(sql, [], |r| r.get(0)).unwrap();
        assert_eq!(count, 0, "{} must be empty after cascade", what);
    }
}

#[test]
fn test_board_flow_on_file_backed_store() {
    let h = harness();
    let post_id = create_post(&h, "teacher-1", "面談の進め方");

    let root = h
        .comments
        .create(
            &post_id,
            "teacher-2",
            &CommentCreateRequest {
                content: "私はまず雑談から入ります。".to_string(),
                parent_comment_id: None,
            },
        )
        .unwrap();
    h.comments
        .create(
            &post_id,
            "teacher-1",
            &CommentCreateRequest {
                content: "参考になります。".to_string(),
                parent_comment_id: Some(root.id.clone()),
            },
        )
        .unwrap();

    let detail = h.posts.get(&post_id, "teacher-2").unwrap();
    assert_eq!(detail.comment_count, 2);
    assert_eq!(detail.author.full_name, "田中先生");

    let roots = h.comments.list_roots(&post_id, "teacher-2").unwrap();
    assert_eq!(roots.total, 1);
    assert_eq!(roots.comments[0].reply_count, 1);

    // 管理者が根评论を削除 -> 返信ごと墓碑化、comment_count は据え置き
    h.comments.soft_delete(&root.id, "admin-1").unwrap();
    let roots = h.comments.list_roots(&post_id, "teacher-2").unwrap();
    assert!(roots.comments[0].is_deleted);
    assert!(roots.comments[0].deleted_by_admin);
    assert_eq!(roots.comments[0].content, "");
    assert_eq!(
        h.posts.get(&post_id, "teacher-2").unwrap().comment_count,
        2
    );
}
