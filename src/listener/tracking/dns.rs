use std::collections::{BTreeMap, BTreeSet};

use crate::listener::packet::columns::DNS_ROOT;
use crate::{split_values, DnsFields};

pub type NameMap = BTreeMap<String, BTreeSet<String>>;

/// What one device learned from the DNS replies it received.
///
/// Every table only grows; nothing is pruned until the owning device is reset.
#[derive(Debug, Default, Clone)]
pub struct DnsTables {
    pub ip_to_domains: NameMap,
    pub domain_to_ips: NameMap,
    pub cnames: NameMap,
    /// SRV target -> service name it was announced for.
    pub srv_targets: BTreeMap<String, String>,
}

impl DnsTables {
    pub fn register_reply(&mut self, dns: &DnsFields) {
        self.register_srv(dns);
        self.register_addresses(dns);
    }

    fn register_srv(&mut self, dns: &DnsFields) {
        if dns.srv_name.is_empty() || dns.srv_target.is_empty() || dns.srv_target == DNS_ROOT {
            return;
        }
        self.srv_targets
            .insert(dns.srv_target.clone(), dns.srv_name.clone());
        self.cnames
            .entry(dns.srv_name.clone())
            .or_default()
            .insert(dns.srv_target.clone());
    }

    // An address answer for an SRV target is booked under the service name, so
    // the connection to that address shows the service rather than the host.
    fn register_addresses(&mut self, dns: &DnsFields) {
        if dns.a.is_empty() && dns.aaaa.is_empty() {
            return;
        }
        let ips: BTreeSet<String> = split_values(&dns.a)
            .chain(split_values(&dns.aaaa))
            .map(str::to_string)
            .collect();

        let qry_name = self
            .srv_targets
            .get(&dns.qry_name)
            .cloned()
            .unwrap_or_else(|| dns.qry_name.clone());

        for ip in &ips {
            self.ip_to_domains
                .entry(ip.clone())
                .or_default()
                .insert(qry_name.clone());
        }
        self.domain_to_ips
            .entry(qry_name)
            .or_default()
            .extend(ips);

        let aliases: BTreeSet<String> = split_values(&dns.resp_name)
            .chain(split_values(&dns.cname))
            .filter(|name| *name != DNS_ROOT && *name != dns.qry_name)
            .map(str::to_string)
            .collect();
        if !aliases.is_empty() {
            self.cnames
                .entry(dns.qry_name.clone())
                .or_default()
                .extend(aliases);
        }
    }

    pub fn unique_domains(&self) -> usize {
        self.domain_to_ips.len()
    }

    pub fn domains_of(&self, ip: &str) -> Option<&BTreeSet<String>> {
        self.ip_to_domains.get(ip)
    }
}
