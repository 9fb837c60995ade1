//! Vendor integrations for AutoSSL
//!
//! DNS zone providers publish DNS-01 challenge records, CDN deployers push
//! issued certificates to the edge. Tencent Cloud products share the signed
//! client in [`tencent`].

pub mod cdn;
pub mod credentials;
pub mod dns;
pub mod errors;
pub mod tencent;
pub mod test_utils;

pub use cdn::{CdnDeployer, CdnDeployerRegistry, CdnDomain, QiniuCdnDeployer, TencentCdnDeployer};
pub use credentials::{ProviderType, QiniuConfig, TencentConfig};
pub use dns::{
    challenge_sub_domain, find_best_zone, DefaultDnsProviderFactory, DnsPodProvider,
    DnsProviderFactory, DnsZoneProvider,
};
pub use errors::ProviderError;
pub use tencent::TencentCloudClient;
