pub mod operation;
pub mod product;
pub mod user;

pub use operation::Entity as Operation;
pub use product::Entity as Product;
pub use user::Entity as User;
