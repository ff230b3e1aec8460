pub mod icons;
pub mod output;
pub mod progress;
pub mod table;
pub mod theme;

pub use icons::Icons;
pub use output::{diff_line, dim, error, header, path_row, section, success, summary_row, warn};
pub use progress::Spinner;
pub use table::{TableBuilder, query_table, table_info_table};
pub use theme::{theme, Theme};
