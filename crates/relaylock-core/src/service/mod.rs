pub mod member_lookup;
pub mod relay;
pub mod relay_manager;
