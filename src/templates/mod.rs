pub mod recipe_templates;
pub mod settings_template;

pub use recipe_templates::default_recipe_catalog;
pub use settings_template::default_settings;
