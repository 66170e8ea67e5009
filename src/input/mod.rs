pub mod injector;

pub use injector::{
    build_injector, ClipboardInjector, InjectedEvent, InjectionError, InputInjector, InputMethod,
    RecordingInjector, SyntheticInjector,
};
