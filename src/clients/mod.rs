pub mod yandex_disk;
pub mod yandex_oauth;

pub use yandex_disk::{DiskError, RemoteStorage, YandexDiskClient};
pub use yandex_oauth::{YandexOAuthClient, YandexProfile};
