/*
* Copyright 2019 Comcast Cable Communications Management, LLC
*
* Licensed under the Apache License, Version 2.0 (the "License");
* you may not use this file except in compliance with the License.
* You may obtain a copy of the License at
*
* http://www.apache.org/licenses/LICENSE-2.0
*
* Unless required by applicable law or agreed to in writing, software
* distributed under the License is distributed on an "AS IS" BASIS,
* WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
* See the License for the specific language governing permissions and
* limitations under the License.
*
* SPDX-License-Identifier: Apache-2.0
*/

use flowprobe::config::{Placement, ProbeConfig};
use flowprobe::eal::dev::{Fault, PortId, VdevKind, VirtualPort};
use flowprobe::eal::memory::Memory;
use flowprobe::net::{MacAddr, ProtocolNumbers};
use flowprobe::runtime::{BringUpError, PortError, PortState, QueueError};
use flowprobe::testils::virtual_eal;
use flowprobe::{CoreId, Eal, FlowKey, Runtime, SocketId};

fn config(extra: &str, ports: usize) -> ProbeConfig {
    let mut toml = format!(
        r#"
        app_name = "probe"
        worker_cores = [0, 1, 2, 3]
        dump_memory = false
        {}

        [mempool]
            capacity = 2047
            cache_size = 32

        [flow_table]
            entries = 1024
        "#,
        extra
    );
    for idx in 0..ports {
        toml.push_str(&format!(
            r#"
        [[ports]]
            name = "eth{0}"
            device = "net_ring{0}"
        "#,
            idx
        ));
    }
    toml::from_str(&toml).unwrap()
}

fn ring(idx: usize) -> VirtualPort {
    VirtualPort::new(VdevKind::Ring, format!("net_ring{}", idx))
}

#[test]
fn two_ports_one_socket() {
    let config = config("[topology]\nsockets = [[0, 1, 2, 3]]", 2);
    let eal = Eal::init(&config).unwrap();
    let runtime = Runtime::build(config, eal.clone()).unwrap();

    assert_eq!(1, runtime.mempools().len());
    assert_eq!(1, runtime.flow_tables().len());
    assert_eq!(2, runtime.ports().len());
    assert_eq!(
        vec!["probe_pool_0".to_owned()],
        eal.memory().zones("mempool")
    );
    assert_eq!(
        vec!["probe_flow_table_0".to_owned()],
        eal.memory().zones("flow_table")
    );
    assert_eq!(2, eal.memory().zones("rx_ring").len());
    assert_eq!(2, eal.memory().zones("tx_ring").len());

    for port in runtime.ports().iter() {
        assert_eq!(PortState::PromiscuousEnabled, port.state());
        assert!(!port.mac_addr().is_unspecified());
        assert!(eal.devices().promiscuous_get(port.id()).unwrap());

        let queues = &port.queues()[&SocketId::new(0)];
        assert_eq!(1, queues.rx().len());
        assert_eq!(1, queues.tx().len());
        assert_eq!(512, queues.rx()[0].nb_desc());
        assert_eq!(128, queues.tx()[0].nb_desc());
    }

    // both ports fill their rings from the one pool.
    let pool = runtime.mempools().get(SocketId::new(0)).unwrap();
    assert_eq!(1024, pool.in_use());
}

#[test]
fn pool_failure_leaves_nothing_behind() {
    let config = config(
        "socket_mem = [1]\n[topology]\nsockets = [[0, 1, 2, 3]]",
        2,
    );
    let eal = Eal::init(&config).unwrap();

    let res = Runtime::build(config, eal.clone());

    match res {
        Err(BringUpError::PoolAllocation { socket, .. }) => assert_eq!(SocketId::new(0), socket),
        other => panic!("unexpected {:?}", other.map(|_| ())),
    }
    assert_eq!(0, eal.memory().zone_count());
    assert_eq!(0, eal.memory().used(SocketId::new(0)));
}

#[test]
fn one_pool_and_table_per_socket() {
    let mut config = config("[rxtx]\nrxqs = 4", 1);
    config.topology = None;
    let (eal, devices) = virtual_eal(
        Memory::unlimited(),
        &[vec![0, 1], vec![2, 3]],
        vec![ring(0)],
    );

    let mut runtime = Runtime::build(config, eal.clone()).unwrap();

    assert_eq!(vec![SocketId::new(0), SocketId::new(1)], runtime.mempools().sockets());
    assert_eq!(vec![SocketId::new(0), SocketId::new(1)], runtime.flow_tables().sockets());
    assert_eq!(4, devices.rx_queues_setup());
    assert_eq!(1, devices.tx_queues_setup());

    let port = runtime.ports().get(PortId::new(0)).unwrap();
    for socket in [SocketId::new(0), SocketId::new(1)].iter() {
        let queues = &port.queues()[socket];
        assert_eq!(2, queues.rx().len());
        for rxq in queues.rx() {
            assert_eq!(*socket, rxq.pool().socket());
        }
    }

    let table = runtime.flow_table_for(CoreId::new(3)).unwrap();
    assert_eq!(SocketId::new(1), table.socket());

    let key = FlowKey::v4(
        ProtocolNumbers::Tcp,
        "10.0.0.1:4321".parse().unwrap(),
        "10.0.0.2:443".parse().unwrap(),
    );
    table.lookup_or_insert(&key).unwrap().record(1500, 1);
    assert_eq!(1, table.lookup(&key).unwrap().packets);
    assert!(runtime.flow_table_for(CoreId::new(0)).unwrap().lookup(&key).is_none());
}

#[test]
fn shared_placement_creates_one_table() {
    let mut config = config("", 1);
    config.flow_table.placement = Placement::Shared;
    let (eal, _) = virtual_eal(Memory::unlimited(), &[vec![0, 1], vec![2, 3]], vec![ring(0)]);

    let mut runtime = Runtime::build(config, eal).unwrap();

    assert_eq!(2, runtime.mempools().len());
    assert_eq!(vec![SocketId::new(0)], runtime.flow_tables().sockets());
    assert_eq!(
        SocketId::new(0),
        runtime.flow_table_for(CoreId::new(2)).unwrap().socket()
    );
}

#[test]
fn numa_off_places_everything_on_socket_0() {
    let mut config = config("numa = false", 1);
    config.flow_table.placement = Placement::PerSocket;
    let (eal, _) = virtual_eal(Memory::unlimited(), &[vec![0, 1], vec![2, 3]], vec![ring(0)]);

    let runtime = Runtime::build(config, eal).unwrap();

    assert_eq!(vec![SocketId::new(0)], runtime.mempools().sockets());
    assert_eq!(vec![SocketId::new(0)], runtime.flow_tables().sockets());
}

#[test]
fn unknown_core_is_rejected() {
    let config = config("", 1);
    let (eal, _) = virtual_eal(Memory::unlimited(), &[vec![0, 1]], vec![ring(0)]);

    let res = Runtime::build(config, eal);

    assert!(matches!(res, Err(BringUpError::UnknownCore(core)) if core == CoreId::new(2)));
}

#[test]
fn queue_failure_names_port() {
    let config = config("[rxtx]\nrxd = 32", 2);
    let (eal, devices) = virtual_eal(
        Memory::unlimited(),
        &[vec![0, 1, 2, 3]],
        vec![ring(0), VirtualPort::new(VdevKind::Tap, "net_tap0")],
    );

    let res = Runtime::build(config, eal.clone());

    match res {
        Err(BringUpError::QueueSetup { port, source }) => {
            assert_eq!(PortId::new(1), port);
            assert!(matches!(source, QueueError::InvalidDescriptors { .. }));
        }
        other => panic!("unexpected {:?}", other.map(|_| ())),
    }
    assert!(eal.memory().zones("flow_table").is_empty());
    assert!(!devices.is_started(PortId::new(0)));
}

#[test]
fn start_and_promiscuous_failures() {
    let (eal, _) = virtual_eal(
        Memory::unlimited(),
        &[vec![0, 1, 2, 3]],
        vec![ring(0).fail_on(Fault::Start)],
    );
    let res = Runtime::build(config("", 1), eal);
    assert!(matches!(
        res,
        Err(BringUpError::DeviceStart {
            source: PortError::Device(_),
            ..
        })
    ));

    let (eal, devices) = virtual_eal(
        Memory::unlimited(),
        &[vec![0, 1, 2, 3]],
        vec![ring(0).fail_on(Fault::Promiscuous)],
    );
    let res = Runtime::build(config("", 1), eal.clone());
    assert!(matches!(res, Err(BringUpError::PromiscuousEnable { .. })));
    assert!(!devices.is_started(PortId::new(0)));
    assert!(eal.memory().zones("flow_table").is_empty());
}

#[test]
fn configure_failure_stops_before_memory() {
    let (eal, devices) = virtual_eal(
        Memory::unlimited(),
        &[vec![0, 1, 2, 3]],
        vec![ring(0).max_queues(1, 1)],
    );

    let res = Runtime::build(config("[rxtx]\nrxqs = 2", 1), eal.clone());

    assert!(matches!(
        res,
        Err(BringUpError::PortConfiguration {
            source: PortError::InsufficientRxQueues(1),
            ..
        })
    ));
    assert_eq!(0, eal.memory().zone_count());
    assert_eq!(0, devices.rx_queues_setup());
}

#[test]
fn table_failure_after_ports_are_up() {
    let mut config = config("", 1);
    config.flow_table.entries = 4_194_304;
    let (eal, devices) = virtual_eal(
        Memory::with_limits(vec![(SocketId::new(0), 16 << 20)]),
        &[vec![0, 1, 2, 3]],
        vec![ring(0).mac(MacAddr::from([0x02, 0, 0, 0, 0, 1]))],
    );

    let res = Runtime::build(config, eal.clone());

    assert!(matches!(
        res,
        Err(BringUpError::HashTableCreation { socket, .. }) if socket == SocketId::new(0)
    ));
    assert_eq!(1, devices.rx_queues_setup());
    assert!(eal.memory().zones("flow_table").is_empty());
}

#[test]
fn dump_lists_pools_and_tables() {
    let (eal, _) = virtual_eal(Memory::unlimited(), &[vec![0, 1, 2, 3]], vec![ring(0)]);
    let runtime = Runtime::build(config("", 1), eal).unwrap();

    let mut out = Vec::new();
    runtime.dump(&mut out).unwrap();
    let out = String::from_utf8(out).unwrap();

    assert!(out.contains("----------- MEMORY_SEGMENTS -----------"));
    assert!(out.contains("------------ MEMORY_ZONES -------------"));
    assert!(out.contains("---------- TAIL_QUEUES ----------------"));
    assert!(out.contains("name:<probe_pool_0>"));
    assert!(out.contains("qname:<flow_table>, objects:1"));
}

#[test]
fn shutdown_stops_ports() {
    let (eal, devices) = virtual_eal(Memory::unlimited(), &[vec![0, 1, 2, 3]], vec![ring(0), ring(1)]);
    let mut runtime = Runtime::build(config("", 2), eal).unwrap();

    assert!(devices.is_started(PortId::new(0)));
    runtime.shutdown();

    assert!(!devices.is_started(PortId::new(0)));
    assert!(!devices.is_started(PortId::new(1)));
    assert_eq!(PortState::MemoryReady, runtime.ports().get(PortId::new(1)).unwrap().state());
}
