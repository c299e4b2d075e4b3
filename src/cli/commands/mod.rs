mod info;
mod list;
mod sync;
mod validate;
mod videos;

pub use info::cmd_info;
pub use list::cmd_list;
pub use sync::cmd_sync;
pub use validate::cmd_validate;
pub use videos::cmd_videos;
