// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! In-memory control plane implementing [`CloudApi`].
//!
//! Models the behaviors the reconcilers depend on: per-listener default pools, cascading
//! deletes, unique `(protocol, port)` listeners, tag-filtered list queries, cursor
//! pagination and address allocation from subnet CIDRs. Tests can script provisioning
//! statuses, inject failures for a named operation and inspect the log of mutating calls.

use super::types::{
    FixedIp, FloatingIp, FloatingIpCreate, FloatingIpQuery, HealthMonitor, HealthMonitorCreate,
    HealthMonitorUpdate, Listener, ListenerCreate, ListenerUpdate, LoadBalancer,
    LoadBalancerCreate, LoadBalancerQuery, LoadBalancerUpdate, Member, MemberSpec, Network,
    NetworkQuery, Page, PageRequest, Pool, PoolCreate, PoolUpdate, Port, PortQuery, PortUpdate,
    ProvisioningStatus, SecurityGroup, SecurityGroupCreate, SecurityGroupQuery,
    SecurityGroupRule, SecurityGroupRuleQuery, SecurityGroupRuleSpec, Subnet, SubnetQuery,
};
use super::{CloudApi, CloudResult};
use crate::errors::CloudError;
use async_trait::async_trait;
use ipnetwork::IpNetwork;
use reqwest::StatusCode;
use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Default number of items per list page
const DEFAULT_PAGE_SIZE: usize = 50;

/// First host offset used when allocating addresses from a subnet
const FIRST_ALLOCATED_HOST: usize = 10;

/// Device owner prefix of VIP ports created for load balancers
const VIP_PORT_DEVICE_PREFIX: &str = "octavia-lb-";

#[derive(Default)]
struct State {
    next_id: u64,
    page_size: usize,
    load_balancers: BTreeMap<String, LoadBalancer>,
    /// Statuses reported by successive reads of a load balancer
    status_scripts: HashMap<String, VecDeque<ProvisioningStatus>>,
    /// Script applied to the next created load balancer
    next_create_script: Vec<ProvisioningStatus>,
    /// The next create stores the load balancer but answers 409, as when a concurrent
    /// caller won the race for the same name
    lose_next_create_race: bool,
    listeners: BTreeMap<String, Listener>,
    pools: BTreeMap<String, Pool>,
    members: BTreeMap<String, Vec<Member>>,
    monitors: BTreeMap<String, HealthMonitor>,
    networks: BTreeMap<String, Network>,
    subnets: BTreeMap<String, Subnet>,
    exhausted_subnets: BTreeSet<String>,
    allocations: HashMap<String, usize>,
    ports: BTreeMap<String, Port>,
    floating_ips: BTreeMap<String, FloatingIp>,
    security_groups: BTreeMap<String, SecurityGroup>,
    rules: BTreeMap<String, SecurityGroupRule>,
    failures: HashMap<String, VecDeque<CloudError>>,
    mutations: Vec<String>,
    calls: usize,
}

impl State {
    fn id(&mut self, kind: &str) -> String {
        self.next_id += 1;
        format!("{kind}-{:04}", self.next_id)
    }

    fn record(&mut self, entry: String) {
        self.mutations.push(entry);
    }

    fn allocate(&mut self, subnet_id: &str) -> CloudResult<String> {
        if self.exhausted_subnets.contains(subnet_id) {
            return Err(CloudError::conflict(format!(
                "No more IP addresses available on subnet {subnet_id}"
            )));
        }
        let subnet = self
            .subnets
            .get(subnet_id)
            .ok_or_else(|| CloudError::not_found(format!("subnet {subnet_id} not found")))?;
        let network: IpNetwork = subnet.cidr.parse().map_err(|e| {
            CloudError::new(
                StatusCode::BAD_REQUEST,
                format!("invalid cidr {}: {e}", subnet.cidr),
            )
        })?;
        let counter = self.allocations.entry(subnet_id.to_string()).or_default();
        let address = network
            .iter()
            .nth(FIRST_ALLOCATED_HOST + *counter)
            .ok_or_else(|| {
                CloudError::conflict(format!("No more IP addresses available on subnet {subnet_id}"))
            })?;
        *counter += 1;
        Ok(address.to_string())
    }

    fn first_subnet_of(&self, network_id: &str) -> Option<String> {
        self.subnets
            .values()
            .find(|s| s.network_id == network_id)
            .map(|s| s.id.clone())
    }

    fn remove_pool(&mut self, pool_id: &str) {
        if let Some(pool) = self.pools.remove(pool_id) {
            self.members.remove(pool_id);
            if let Some(monitor_id) = &pool.monitor_id {
                self.monitors.remove(monitor_id);
            }
            if let Some(listener) = pool
                .listener_id
                .as_ref()
                .and_then(|id| self.listeners.get_mut(id))
            {
                listener.default_pool_id = None;
            }
        }
    }
}

fn paginate<T: Clone>(items: Vec<T>, page: &PageRequest, page_size: usize) -> CloudResult<Page<T>> {
    let offset = match &page.marker {
        None => 0,
        Some(marker) => marker.parse::<usize>().map_err(|_| {
            CloudError::new(StatusCode::BAD_REQUEST, format!("invalid marker {marker}"))
        })?,
    };
    let limit = page.limit.unwrap_or(page_size).max(1);
    let end = (offset + limit).min(items.len());
    let next = (end < items.len()).then(|| end.to_string());
    Ok(Page {
        items: items.get(offset..end).map(<[T]>::to_vec).unwrap_or_default(),
        next,
    })
}

fn missing(kind: &str, id: &str) -> CloudError {
    CloudError::not_found(format!("{kind} {id} could not be found"))
}

/// In-memory implementation of the cloud API facade.
pub struct InMemoryCloud {
    state: Mutex<State>,
}

impl Default for InMemoryCloud {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryCloud {
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State {
                page_size: DEFAULT_PAGE_SIZE,
                ..State::default()
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Count the call and pop an injected failure for `operation`, if any.
    fn enter(&self, operation: &str) -> CloudResult<MutexGuard<'_, State>> {
        let mut state = self.lock();
        state.calls += 1;
        if let Some(err) = state
            .failures
            .get_mut(operation)
            .and_then(VecDeque::pop_front)
        {
            return Err(err);
        }
        Ok(state)
    }

    // ------------------------------------------------------------------------
    // Seeding and scripting
    // ------------------------------------------------------------------------

    pub fn set_page_size(&self, size: usize) {
        self.lock().page_size = size.max(1);
    }

    /// Fail the next call of `operation` with `err`. Failures queue up in order.
    pub fn fail_next(&self, operation: &str, err: CloudError) {
        self.lock()
            .failures
            .entry(operation.to_string())
            .or_default()
            .push_back(err);
    }

    /// Statuses returned by successive reads of the next created load balancer.
    ///
    /// The last status sticks. Without a script a created load balancer reads `ACTIVE`.
    pub fn script_next_create(&self, statuses: Vec<ProvisioningStatus>) {
        self.lock().next_create_script = statuses;
    }

    /// Make the next load balancer creation lose a race against a concurrent creator.
    pub fn lose_next_create_race(&self) {
        self.lock().lose_next_create_race = true;
    }

    pub fn set_load_balancer_status(&self, id: &str, status: ProvisioningStatus) {
        let mut state = self.lock();
        state.status_scripts.remove(id);
        if let Some(lb) = state.load_balancers.get_mut(id) {
            lb.provisioning_status = status;
        }
    }

    pub fn add_network(&self, network: Network) {
        self.lock().networks.insert(network.id.clone(), network);
    }

    pub fn add_subnet(&self, subnet: Subnet) {
        self.lock().subnets.insert(subnet.id.clone(), subnet);
    }

    /// Make address allocation on `subnet_id` fail as if the subnet were full.
    pub fn exhaust_subnet(&self, subnet_id: &str) {
        self.lock().exhausted_subnets.insert(subnet_id.to_string());
    }

    pub fn add_port(&self, port: Port) {
        self.lock().ports.insert(port.id.clone(), port);
    }

    pub fn add_floating_ip(&self, fip: FloatingIp) {
        self.lock().floating_ips.insert(fip.id.clone(), fip);
    }

    /// Insert a load balancer created outside the controller.
    pub fn add_load_balancer(&self, lb: LoadBalancer) {
        self.lock().load_balancers.insert(lb.id.clone(), lb);
    }

    pub fn add_listener(&self, listener: Listener) {
        self.lock().listeners.insert(listener.id.clone(), listener);
    }

    pub fn add_security_group(&self, group: SecurityGroup) {
        self.lock().security_groups.insert(group.id.clone(), group);
    }

    // ------------------------------------------------------------------------
    // Inspection
    // ------------------------------------------------------------------------

    #[must_use]
    pub fn load_balancers(&self) -> Vec<LoadBalancer> {
        self.lock().load_balancers.values().cloned().collect()
    }

    #[must_use]
    pub fn load_balancer(&self, id: &str) -> Option<LoadBalancer> {
        self.lock().load_balancers.get(id).cloned()
    }

    #[must_use]
    pub fn listeners_of(&self, lb_id: &str) -> Vec<Listener> {
        self.lock()
            .listeners
            .values()
            .filter(|l| l.loadbalancer_id == lb_id)
            .cloned()
            .collect()
    }

    #[must_use]
    pub fn pool(&self, id: &str) -> Option<Pool> {
        self.lock().pools.get(id).cloned()
    }

    #[must_use]
    pub fn pools(&self) -> Vec<Pool> {
        self.lock().pools.values().cloned().collect()
    }

    #[must_use]
    pub fn members_of(&self, pool_id: &str) -> Vec<Member> {
        self.lock()
            .members
            .get(pool_id)
            .cloned()
            .unwrap_or_default()
    }

    #[must_use]
    pub fn monitors(&self) -> Vec<HealthMonitor> {
        self.lock().monitors.values().cloned().collect()
    }

    #[must_use]
    pub fn floating_ips(&self) -> Vec<FloatingIp> {
        self.lock().floating_ips.values().cloned().collect()
    }

    #[must_use]
    pub fn ports(&self) -> Vec<Port> {
        self.lock().ports.values().cloned().collect()
    }

    #[must_use]
    pub fn security_groups(&self) -> Vec<SecurityGroup> {
        self.lock().security_groups.values().cloned().collect()
    }

    #[must_use]
    pub fn security_group_rules(&self) -> Vec<SecurityGroupRule> {
        self.lock().rules.values().cloned().collect()
    }

    /// Mutating calls issued so far, as `"<operation> <target>"` entries.
    #[must_use]
    pub fn mutations(&self) -> Vec<String> {
        self.lock().mutations.clone()
    }

    pub fn clear_mutations(&self) {
        self.lock().mutations.clear();
    }

    /// Total number of facade calls, reads included.
    #[must_use]
    pub fn call_count(&self) -> usize {
        self.lock().calls
    }
}

#[async_trait]
impl CloudApi for InMemoryCloud {
    async fn list_load_balancers(
        &self,
        query: &LoadBalancerQuery,
        page: PageRequest,
    ) -> CloudResult<Page<LoadBalancer>> {
        let state = self.enter("list_load_balancers")?;
        let items = state
            .load_balancers
            .values()
            .filter(|lb| query.name.as_ref().is_none_or(|name| &lb.name == name))
            .cloned()
            .collect();
        paginate(items, &page, state.page_size)
    }

    async fn get_load_balancer(&self, id: &str) -> CloudResult<LoadBalancer> {
        let mut state = self.enter("get_load_balancer")?;
        let scripted = state
            .status_scripts
            .get_mut(id)
            .and_then(|script| {
                if script.len() > 1 {
                    script.pop_front()
                } else {
                    script.front().copied()
                }
            });
        let lb = state
            .load_balancers
            .get_mut(id)
            .ok_or_else(|| missing("load balancer", id))?;
        if let Some(status) = scripted {
            lb.provisioning_status = status;
        }
        Ok(lb.clone())
    }

    async fn create_load_balancer(&self, opts: &LoadBalancerCreate) -> CloudResult<LoadBalancer> {
        let mut state = self.enter("create_load_balancer")?;
        let id = state.id("lb");

        let (vip_port_id, vip_address, vip_subnet_id, vip_network_id) =
            if let Some(port_id) = &opts.vip_port_id {
                let port = state
                    .ports
                    .get(port_id)
                    .ok_or_else(|| missing("port", port_id))?;
                let fixed = port.fixed_ips.first().cloned().ok_or_else(|| {
                    CloudError::new(StatusCode::BAD_REQUEST, "VIP port has no fixed IP")
                })?;
                (
                    port_id.clone(),
                    fixed.ip_address,
                    fixed.subnet_id,
                    port.network_id.clone(),
                )
            } else {
                let subnet_id = opts
                    .vip_subnet_id
                    .clone()
                    .or_else(|| {
                        opts.vip_network_id
                            .as_deref()
                            .and_then(|n| state.first_subnet_of(n))
                    })
                    .ok_or_else(|| {
                        CloudError::new(
                            StatusCode::BAD_REQUEST,
                            "one of vip_subnet_id, vip_network_id or vip_port_id is required",
                        )
                    })?;
                let network_id = state
                    .subnets
                    .get(&subnet_id)
                    .map(|s| s.network_id.clone())
                    .ok_or_else(|| missing("subnet", &subnet_id))?;
                let address = match &opts.vip_address {
                    Some(address) => address.clone(),
                    None => state.allocate(&subnet_id)?,
                };
                let port_id = state.id("port");
                state.ports.insert(
                    port_id.clone(),
                    Port {
                        id: port_id.clone(),
                        name: format!("{VIP_PORT_DEVICE_PREFIX}{id}"),
                        network_id: network_id.clone(),
                        device_id: format!("{VIP_PORT_DEVICE_PREFIX}{id}"),
                        fixed_ips: vec![FixedIp {
                            subnet_id: subnet_id.clone(),
                            ip_address: address.clone(),
                        }],
                        security_groups: Vec::new(),
                        tags: Vec::new(),
                    },
                );
                (port_id, address, subnet_id, network_id)
            };

        let script: VecDeque<ProvisioningStatus> =
            std::mem::take(&mut state.next_create_script).into();
        let lb = LoadBalancer {
            id: id.clone(),
            name: opts.name.clone(),
            description: opts.description.clone(),
            provisioning_status: if script.is_empty() {
                ProvisioningStatus::Active
            } else {
                ProvisioningStatus::PendingCreate
            },
            vip_address,
            vip_port_id,
            vip_subnet_id,
            vip_network_id,
            tags: opts.tags.clone(),
            provider: opts.provider.clone(),
            flavor_id: opts.flavor_id.clone(),
            availability_zone: opts.availability_zone.clone(),
        };
        if !script.is_empty() {
            state.status_scripts.insert(id.clone(), script);
        }
        state.load_balancers.insert(id.clone(), lb.clone());
        state.record(format!("create_load_balancer {}", opts.name));
        if std::mem::take(&mut state.lose_next_create_race) {
            return Err(CloudError::conflict(format!(
                "Load balancer {} is already being created",
                opts.name
            )));
        }
        Ok(lb)
    }

    async fn update_load_balancer(
        &self,
        id: &str,
        opts: &LoadBalancerUpdate,
    ) -> CloudResult<LoadBalancer> {
        let mut state = self.enter("update_load_balancer")?;
        let lb = state
            .load_balancers
            .get_mut(id)
            .ok_or_else(|| missing("load balancer", id))?;
        if let Some(tags) = &opts.tags {
            lb.tags = tags.clone();
        }
        let updated = lb.clone();
        state.record(format!("update_load_balancer {id}"));
        Ok(updated)
    }

    async fn delete_load_balancer(&self, id: &str, cascade: bool) -> CloudResult<()> {
        let mut state = self.enter("delete_load_balancer")?;
        let lb = state
            .load_balancers
            .get(id)
            .cloned()
            .ok_or_else(|| missing("load balancer", id))?;
        let listener_ids: Vec<String> = state
            .listeners
            .values()
            .filter(|l| l.loadbalancer_id == id)
            .map(|l| l.id.clone())
            .collect();
        if !cascade && !listener_ids.is_empty() {
            return Err(CloudError::conflict(format!(
                "load balancer {id} still has listeners"
            )));
        }
        let pool_ids: Vec<String> = state
            .pools
            .values()
            .filter(|p| p.loadbalancer_id == id)
            .map(|p| p.id.clone())
            .collect();
        for pool_id in pool_ids {
            state.remove_pool(&pool_id);
        }
        for listener_id in listener_ids {
            state.listeners.remove(&listener_id);
        }
        if let Some(port) = state.ports.get(&lb.vip_port_id) {
            if port.device_id.starts_with(VIP_PORT_DEVICE_PREFIX) {
                state.ports.remove(&lb.vip_port_id);
            }
        }
        state.load_balancers.remove(id);
        state.status_scripts.remove(id);
        state.record(format!("delete_load_balancer {id}"));
        Ok(())
    }

    async fn list_listeners(&self, lb_id: &str, page: PageRequest) -> CloudResult<Page<Listener>> {
        let state = self.enter("list_listeners")?;
        let items = state
            .listeners
            .values()
            .filter(|l| l.loadbalancer_id == lb_id)
            .cloned()
            .collect();
        paginate(items, &page, state.page_size)
    }

    async fn create_listener(&self, opts: &ListenerCreate) -> CloudResult<Listener> {
        let mut state = self.enter("create_listener")?;
        if !state.load_balancers.contains_key(&opts.loadbalancer_id) {
            return Err(missing("load balancer", &opts.loadbalancer_id));
        }
        if state.listeners.values().any(|l| {
            l.loadbalancer_id == opts.loadbalancer_id
                && l.protocol_port == opts.protocol_port
                && l.protocol == opts.protocol
        }) {
            return Err(CloudError::conflict(format!(
                "another listener already uses {} port {}",
                opts.protocol, opts.protocol_port
            )));
        }
        let id = state.id("listener");
        let listener = Listener {
            id: id.clone(),
            name: opts.name.clone(),
            loadbalancer_id: opts.loadbalancer_id.clone(),
            protocol: opts.protocol,
            protocol_port: opts.protocol_port,
            connection_limit: opts.connection_limit,
            insert_headers: opts.insert_headers.clone(),
            default_tls_container_ref: opts.default_tls_container_ref.clone(),
            timeout_client_data: opts.timeout_client_data,
            timeout_member_connect: opts.timeout_member_connect,
            timeout_member_data: opts.timeout_member_data,
            timeout_tcp_inspect: opts.timeout_tcp_inspect,
            allowed_cidrs: opts.allowed_cidrs.clone().unwrap_or_default(),
            tags: opts.tags.clone().unwrap_or_default(),
            default_pool_id: None,
        };
        state.listeners.insert(id, listener.clone());
        state.record(format!(
            "create_listener {}/{}",
            opts.protocol, opts.protocol_port
        ));
        Ok(listener)
    }

    async fn update_listener(&self, id: &str, opts: &ListenerUpdate) -> CloudResult<Listener> {
        let mut state = self.enter("update_listener")?;
        let listener = state
            .listeners
            .get_mut(id)
            .ok_or_else(|| missing("listener", id))?;
        if let Some(limit) = opts.connection_limit {
            listener.connection_limit = limit;
        }
        if let Some(headers) = &opts.insert_headers {
            listener.insert_headers = headers.clone();
        }
        if let Some(tls) = &opts.default_tls_container_ref {
            listener.default_tls_container_ref = (!tls.is_empty()).then(|| tls.clone());
        }
        if opts.timeout_client_data.is_some() {
            listener.timeout_client_data = opts.timeout_client_data;
        }
        if opts.timeout_member_connect.is_some() {
            listener.timeout_member_connect = opts.timeout_member_connect;
        }
        if opts.timeout_member_data.is_some() {
            listener.timeout_member_data = opts.timeout_member_data;
        }
        if opts.timeout_tcp_inspect.is_some() {
            listener.timeout_tcp_inspect = opts.timeout_tcp_inspect;
        }
        if let Some(cidrs) = &opts.allowed_cidrs {
            listener.allowed_cidrs = cidrs.clone();
        }
        if let Some(tags) = &opts.tags {
            listener.tags = tags.clone();
        }
        let updated = listener.clone();
        state.record(format!("update_listener {id}"));
        Ok(updated)
    }

    async fn delete_listener(&self, id: &str) -> CloudResult<()> {
        let mut state = self.enter("delete_listener")?;
        let listener = state
            .listeners
            .remove(id)
            .ok_or_else(|| missing("listener", id))?;
        if let Some(pool) = listener
            .default_pool_id
            .as_ref()
            .and_then(|pool_id| state.pools.get_mut(pool_id))
        {
            pool.listener_id = None;
        }
        state.record(format!("delete_listener {id}"));
        Ok(())
    }

    async fn get_pool(&self, id: &str) -> CloudResult<Pool> {
        let state = self.enter("get_pool")?;
        state.pools.get(id).cloned().ok_or_else(|| missing("pool", id))
    }

    async fn create_pool(&self, opts: &PoolCreate) -> CloudResult<Pool> {
        let mut state = self.enter("create_pool")?;
        let listener = state
            .listeners
            .get(&opts.listener_id)
            .cloned()
            .ok_or_else(|| missing("listener", &opts.listener_id))?;
        if listener.default_pool_id.is_some() {
            return Err(CloudError::conflict(format!(
                "listener {} already has a default pool",
                listener.id
            )));
        }
        let id = state.id("pool");
        let pool = Pool {
            id: id.clone(),
            name: opts.name.clone(),
            loadbalancer_id: listener.loadbalancer_id.clone(),
            listener_id: Some(listener.id.clone()),
            protocol: opts.protocol,
            lb_algorithm: opts.lb_algorithm.clone(),
            session_persistence: opts.session_persistence.clone(),
            monitor_id: None,
        };
        state.pools.insert(id.clone(), pool.clone());
        if let Some(l) = state.listeners.get_mut(&listener.id) {
            l.default_pool_id = Some(id);
        }
        state.record(format!("create_pool {}", opts.protocol));
        Ok(pool)
    }

    async fn update_pool(&self, id: &str, opts: &PoolUpdate) -> CloudResult<Pool> {
        let mut state = self.enter("update_pool")?;
        let pool = state.pools.get_mut(id).ok_or_else(|| missing("pool", id))?;
        if let Some(method) = &opts.lb_algorithm {
            pool.lb_algorithm = method.clone();
        }
        if let Some(persistence) = &opts.session_persistence {
            pool.session_persistence = persistence.clone();
        }
        let updated = pool.clone();
        state.record(format!("update_pool {id}"));
        Ok(updated)
    }

    async fn delete_pool(&self, id: &str) -> CloudResult<()> {
        let mut state = self.enter("delete_pool")?;
        if !state.pools.contains_key(id) {
            return Err(missing("pool", id));
        }
        state.remove_pool(id);
        state.record(format!("delete_pool {id}"));
        Ok(())
    }

    async fn list_members(&self, pool_id: &str, page: PageRequest) -> CloudResult<Page<Member>> {
        let state = self.enter("list_members")?;
        if !state.pools.contains_key(pool_id) {
            return Err(missing("pool", pool_id));
        }
        let items = state.members.get(pool_id).cloned().unwrap_or_default();
        paginate(items, &page, state.page_size)
    }

    async fn create_member(&self, pool_id: &str, member: &MemberSpec) -> CloudResult<Member> {
        let mut state = self.enter("create_member")?;
        if !state.pools.contains_key(pool_id) {
            return Err(missing("pool", pool_id));
        }
        let duplicate = state.members.get(pool_id).is_some_and(|members| {
            members
                .iter()
                .any(|m| m.address == member.address && m.protocol_port == member.protocol_port)
        });
        if duplicate {
            return Err(CloudError::conflict(format!(
                "member {}:{} already exists",
                member.address, member.protocol_port
            )));
        }
        let id = state.id("member");
        let created = Member {
            id,
            name: member.name.clone(),
            address: member.address.clone(),
            protocol_port: member.protocol_port,
            monitor_port: member.monitor_port,
            subnet_id: member.subnet_id.clone(),
        };
        state
            .members
            .entry(pool_id.to_string())
            .or_default()
            .push(created.clone());
        state.record(format!("create_member {}", member.name));
        Ok(created)
    }

    async fn delete_member(&self, pool_id: &str, member_id: &str) -> CloudResult<()> {
        let mut state = self.enter("delete_member")?;
        let members = state
            .members
            .get_mut(pool_id)
            .ok_or_else(|| missing("pool", pool_id))?;
        let before = members.len();
        members.retain(|m| m.id != member_id);
        if members.len() == before {
            return Err(missing("member", member_id));
        }
        state.record(format!("delete_member {member_id}"));
        Ok(())
    }

    async fn batch_update_members(
        &self,
        pool_id: &str,
        members: &[MemberSpec],
    ) -> CloudResult<()> {
        let mut state = self.enter("batch_update_members")?;
        if !state.pools.contains_key(pool_id) {
            return Err(missing("pool", pool_id));
        }
        let existing = state.members.remove(pool_id).unwrap_or_default();
        let mut replaced = Vec::with_capacity(members.len());
        for spec in members {
            let id = existing
                .iter()
                .find(|m| m.address == spec.address && m.protocol_port == spec.protocol_port)
                .map(|m| m.id.clone());
            let id = match id {
                Some(id) => id,
                None => state.id("member"),
            };
            replaced.push(Member {
                id,
                name: spec.name.clone(),
                address: spec.address.clone(),
                protocol_port: spec.protocol_port,
                monitor_port: spec.monitor_port,
                subnet_id: spec.subnet_id.clone(),
            });
        }
        state.members.insert(pool_id.to_string(), replaced);
        state.record(format!("batch_update_members {pool_id}"));
        Ok(())
    }

    async fn get_health_monitor(&self, id: &str) -> CloudResult<HealthMonitor> {
        let state = self.enter("get_health_monitor")?;
        state
            .monitors
            .get(id)
            .cloned()
            .ok_or_else(|| missing("health monitor", id))
    }

    async fn create_health_monitor(
        &self,
        opts: &HealthMonitorCreate,
    ) -> CloudResult<HealthMonitor> {
        let mut state = self.enter("create_health_monitor")?;
        let pool = state
            .pools
            .get(&opts.pool_id)
            .ok_or_else(|| missing("pool", &opts.pool_id))?;
        if pool.monitor_id.is_some() {
            return Err(CloudError::conflict(format!(
                "pool {} already has a health monitor",
                opts.pool_id
            )));
        }
        let id = state.id("monitor");
        let monitor = HealthMonitor {
            id: id.clone(),
            name: opts.name.clone(),
            pool_id: opts.pool_id.clone(),
            kind: opts.kind,
            delay: opts.delay,
            timeout: opts.timeout,
            max_retries: opts.max_retries,
            max_retries_down: opts.max_retries_down,
            url_path: opts.url_path.clone(),
            http_method: opts.http_method.clone(),
            expected_codes: opts.expected_codes.clone(),
        };
        state.monitors.insert(id.clone(), monitor.clone());
        if let Some(pool) = state.pools.get_mut(&opts.pool_id) {
            pool.monitor_id = Some(id);
        }
        state.record(format!("create_health_monitor {}", opts.kind));
        Ok(monitor)
    }

    async fn update_health_monitor(
        &self,
        id: &str,
        opts: &HealthMonitorUpdate,
    ) -> CloudResult<HealthMonitor> {
        let mut state = self.enter("update_health_monitor")?;
        let monitor = state
            .monitors
            .get_mut(id)
            .ok_or_else(|| missing("health monitor", id))?;
        if let Some(name) = &opts.name {
            monitor.name = name.clone();
        }
        if let Some(delay) = opts.delay {
            monitor.delay = delay;
        }
        if let Some(timeout) = opts.timeout {
            monitor.timeout = timeout;
        }
        if let Some(retries) = opts.max_retries {
            monitor.max_retries = retries;
        }
        if let Some(retries_down) = opts.max_retries_down {
            monitor.max_retries_down = retries_down;
        }
        let updated = monitor.clone();
        state.record(format!("update_health_monitor {id}"));
        Ok(updated)
    }

    async fn delete_health_monitor(&self, id: &str) -> CloudResult<()> {
        let mut state = self.enter("delete_health_monitor")?;
        let monitor = state
            .monitors
            .remove(id)
            .ok_or_else(|| missing("health monitor", id))?;
        if let Some(pool) = state.pools.get_mut(&monitor.pool_id) {
            pool.monitor_id = None;
        }
        state.record(format!("delete_health_monitor {id}"));
        Ok(())
    }

    async fn list_networks(
        &self,
        query: &NetworkQuery,
        page: PageRequest,
    ) -> CloudResult<Page<Network>> {
        let state = self.enter("list_networks")?;
        let items = state
            .networks
            .values()
            .filter(|n| query.external.is_none_or(|external| n.external == external))
            .cloned()
            .collect();
        paginate(items, &page, state.page_size)
    }

    async fn get_subnet(&self, id: &str) -> CloudResult<Subnet> {
        let state = self.enter("get_subnet")?;
        state
            .subnets
            .get(id)
            .cloned()
            .ok_or_else(|| missing("subnet", id))
    }

    async fn list_subnets(
        &self,
        query: &SubnetQuery,
        page: PageRequest,
    ) -> CloudResult<Page<Subnet>> {
        let state = self.enter("list_subnets")?;
        let items = state
            .subnets
            .values()
            .filter(|s| {
                query
                    .network_id
                    .as_ref()
                    .is_none_or(|network| &s.network_id == network)
            })
            .filter(|s| query.tags.admits(&s.tags))
            .cloned()
            .collect();
        paginate(items, &page, state.page_size)
    }

    async fn get_port(&self, id: &str) -> CloudResult<Port> {
        let state = self.enter("get_port")?;
        state.ports.get(id).cloned().ok_or_else(|| missing("port", id))
    }

    async fn list_ports(&self, query: &PortQuery, page: PageRequest) -> CloudResult<Page<Port>> {
        let state = self.enter("list_ports")?;
        let items = state
            .ports
            .values()
            .filter(|p| query.device_id.as_ref().is_none_or(|d| &p.device_id == d))
            .filter(|p| query.network_id.as_ref().is_none_or(|n| &p.network_id == n))
            .filter(|p| query.tags.iter().all(|t| p.tags.contains(t)))
            .cloned()
            .collect();
        paginate(items, &page, state.page_size)
    }

    async fn update_port(&self, id: &str, opts: &PortUpdate) -> CloudResult<Port> {
        let mut state = self.enter("update_port")?;
        let port = state.ports.get_mut(id).ok_or_else(|| missing("port", id))?;
        if let Some(groups) = &opts.security_groups {
            port.security_groups = groups.clone();
        }
        if let Some(tags) = &opts.tags {
            port.tags = tags.clone();
        }
        let updated = port.clone();
        state.record(format!("update_port {id}"));
        Ok(updated)
    }

    async fn list_floating_ips(
        &self,
        query: &FloatingIpQuery,
        page: PageRequest,
    ) -> CloudResult<Page<FloatingIp>> {
        let state = self.enter("list_floating_ips")?;
        let items = state
            .floating_ips
            .values()
            .filter(|f| {
                query
                    .port_id
                    .as_ref()
                    .is_none_or(|port| f.port_id.as_ref() == Some(port))
            })
            .filter(|f| {
                query
                    .floating_ip_address
                    .as_ref()
                    .is_none_or(|addr| &f.floating_ip_address == addr)
            })
            .cloned()
            .collect();
        paginate(items, &page, state.page_size)
    }

    async fn create_floating_ip(&self, opts: &FloatingIpCreate) -> CloudResult<FloatingIp> {
        let mut state = self.enter("create_floating_ip")?;
        if !state.networks.contains_key(&opts.floating_network_id) {
            return Err(missing("network", &opts.floating_network_id));
        }
        let subnet_id = opts
            .subnet_id
            .clone()
            .or_else(|| state.first_subnet_of(&opts.floating_network_id))
            .ok_or_else(|| {
                CloudError::new(
                    StatusCode::BAD_REQUEST,
                    format!("network {} has no subnets", opts.floating_network_id),
                )
            })?;
        let address = match &opts.floating_ip_address {
            Some(address) => {
                if state
                    .floating_ips
                    .values()
                    .any(|f| &f.floating_ip_address == address)
                {
                    return Err(CloudError::conflict(format!(
                        "floating IP {address} is already allocated"
                    )));
                }
                address.clone()
            }
            None => state.allocate(&subnet_id)?,
        };
        let id = state.id("fip");
        let fip = FloatingIp {
            id: id.clone(),
            floating_ip_address: address,
            floating_network_id: opts.floating_network_id.clone(),
            port_id: opts.port_id.clone(),
            subnet_id: Some(subnet_id),
            description: opts.description.clone(),
        };
        state.floating_ips.insert(id, fip.clone());
        state.record(format!("create_floating_ip {}", fip.floating_ip_address));
        Ok(fip)
    }

    async fn update_floating_ip(&self, id: &str, port_id: Option<&str>) -> CloudResult<FloatingIp> {
        let mut state = self.enter("update_floating_ip")?;
        let fip = state
            .floating_ips
            .get_mut(id)
            .ok_or_else(|| missing("floating IP", id))?;
        fip.port_id = port_id.map(str::to_string);
        let updated = fip.clone();
        state.record(match port_id {
            Some(port) => format!("attach_floating_ip {id} {port}"),
            None => format!("detach_floating_ip {id}"),
        });
        Ok(updated)
    }

    async fn delete_floating_ip(&self, id: &str) -> CloudResult<()> {
        let mut state = self.enter("delete_floating_ip")?;
        state
            .floating_ips
            .remove(id)
            .ok_or_else(|| missing("floating IP", id))?;
        state.record(format!("delete_floating_ip {id}"));
        Ok(())
    }

    async fn list_security_groups(
        &self,
        query: &SecurityGroupQuery,
        page: PageRequest,
    ) -> CloudResult<Page<SecurityGroup>> {
        let state = self.enter("list_security_groups")?;
        let items = state
            .security_groups
            .values()
            .filter(|g| query.name.as_ref().is_none_or(|name| &g.name == name))
            .cloned()
            .collect();
        paginate(items, &page, state.page_size)
    }

    async fn create_security_group(
        &self,
        opts: &SecurityGroupCreate,
    ) -> CloudResult<SecurityGroup> {
        let mut state = self.enter("create_security_group")?;
        let id = state.id("sg");
        let group = SecurityGroup {
            id: id.clone(),
            name: opts.name.clone(),
            description: opts.description.clone(),
        };
        state.security_groups.insert(id, group.clone());
        state.record(format!("create_security_group {}", opts.name));
        Ok(group)
    }

    async fn delete_security_group(&self, id: &str) -> CloudResult<()> {
        let mut state = self.enter("delete_security_group")?;
        if !state.security_groups.contains_key(id) {
            return Err(missing("security group", id));
        }
        if state
            .ports
            .values()
            .any(|p| p.security_groups.iter().any(|g| g == id))
        {
            return Err(CloudError::conflict(format!(
                "security group {id} is in use"
            )));
        }
        state.security_groups.remove(id);
        state.rules.retain(|_, r| r.security_group_id != id);
        state.record(format!("delete_security_group {id}"));
        Ok(())
    }

    async fn list_security_group_rules(
        &self,
        query: &SecurityGroupRuleQuery,
        page: PageRequest,
    ) -> CloudResult<Page<SecurityGroupRule>> {
        let state = self.enter("list_security_group_rules")?;
        let items = state
            .rules
            .values()
            .filter(|r| {
                query
                    .security_group_id
                    .as_ref()
                    .is_none_or(|g| &r.security_group_id == g)
            })
            .filter(|r| {
                query
                    .remote_group_id
                    .as_ref()
                    .is_none_or(|g| r.remote_group_id.as_ref() == Some(g))
            })
            .filter(|r| query.spec.as_ref().is_none_or(|spec| spec.matches(r)))
            .cloned()
            .collect();
        paginate(items, &page, state.page_size)
    }

    async fn create_security_group_rule(
        &self,
        rule: &SecurityGroupRuleSpec,
    ) -> CloudResult<SecurityGroupRule> {
        let mut state = self.enter("create_security_group_rule")?;
        if !state.security_groups.contains_key(&rule.security_group_id) {
            return Err(missing("security group", &rule.security_group_id));
        }
        if state.rules.values().any(|r| rule.matches(r)) {
            return Err(CloudError::conflict("Security group rule already exists"));
        }
        let id = state.id("rule");
        let created = SecurityGroupRule {
            id: id.clone(),
            security_group_id: rule.security_group_id.clone(),
            direction: rule.direction,
            protocol: rule.protocol.clone(),
            port_range_min: rule.port_range_min,
            port_range_max: rule.port_range_max,
            remote_ip_prefix: rule.remote_ip_prefix.clone(),
            remote_group_id: rule.remote_group_id.clone(),
            ether_type: rule.ether_type,
        };
        state.rules.insert(id, created.clone());
        state.record(format!(
            "create_security_group_rule {} {}",
            rule.security_group_id,
            rule.port_range_min.unwrap_or_default()
        ));
        Ok(created)
    }

    async fn delete_security_group_rule(&self, id: &str) -> CloudResult<()> {
        let mut state = self.enter("delete_security_group_rule")?;
        state
            .rules
            .remove(id)
            .ok_or_else(|| missing("security group rule", id))?;
        state.record(format!("delete_security_group_rule {id}"));
        Ok(())
    }
}

#[cfg(test)]
#[path = "memory_tests.rs"]
mod memory_tests;
