pub mod resource_list;

pub use resource_list::{describe_source, draw_resource_list, ListContext};
