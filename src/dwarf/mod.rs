mod debug_link;
mod reader;
mod resolver;

pub(crate) use self::resolver::DwarfResolver;
