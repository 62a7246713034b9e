//! 社区掲示板引擎
//!
//! - posts: 帖子 CRUD / 搜索 / 排序 / 分页 / 置顶 / 热门标签
//! - comments: 两层嵌套评论树，软删除级联
//! - votes: (用户, 目标) 至多一票的点赞台账

pub mod comments;
pub mod posts;
pub mod votes;

pub use comments::CommentService;
pub use posts::PostService;
pub use votes::VoteLedger;
