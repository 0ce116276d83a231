pub mod backend;
pub mod comp;
pub mod external;
pub mod overlay;
pub mod utils;

pub use backend::{Capabilities, FbMap};
pub use comp::{Comp, Display, DisplayAttributes};
pub use external::ExternalDisplay;
pub use overlay::Overlay;
