pub mod page;

pub use page::{page_constants::PAGE_SIZE, Page, PageId};
