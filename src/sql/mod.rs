pub mod builder;
pub mod options;
pub mod params;

pub use builder::SqlBuilder;
pub use options::{OrderDirection, SearchOptions};
pub use params::{bind_all, BindType, BindValue, RenderedStatement, SqlParam, SqlStatement};
