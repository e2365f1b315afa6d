//! Response combining on the device side: several logical completions share one flit when the
//! flit that is already queued for the link still has room.

use crate::timeq::PacketQueue;
use crate::xbar::packet::{MemCmd, Transaction};
use crate::xbar::types::RequestId;

#[derive(Debug)]
pub enum Combined {
    /// Nothing to merge with; forward as a flit of its own.
    Standalone(Transaction),
    /// Forward; the unit took over the open flit of the previously queued unit.
    Inherited {
        tx: Transaction,
        removed_completion: bool,
    },
    /// Carried inside a queued unit; must not be forwarded separately.
    Absorbed { carrier: RequestId },
}

/// Merge an encoded response into `queue`, the outbound queue of the link it is bound for.
pub fn combine(queue: &mut PacketQueue<Transaction>, mut tx: Transaction) -> Combined {
    match tx.cmd {
        MemCmd::Cmp => {
            let carrier = queue
                .iter_mut()
                .find(|queued| !queued.flit_continued && queued.reserved_for_more_ndr > 0);
            match carrier {
                Some(carrier) => {
                    carrier.reserved_for_more_ndr -= 1;
                    let id = carrier.id;
                    carrier.bundled.push(tx);
                    Combined::Absorbed { carrier: id }
                }
                None => Combined::Standalone(tx),
            }
        }
        MemCmd::MemData => {
            // data may only chain onto the most recent unit
            let Some(pred) = queue.back_mut() else {
                return Combined::Standalone(tx);
            };
            if pred.flit_continued || pred.reserved_for_more_drs == 0 {
                return Combined::Standalone(tx);
            }
            tx.reserved_for_more_drs = pred.reserved_for_more_drs - 1;
            tx.reserved_for_more_ndr = pred.reserved_for_more_ndr;
            let removed_completion = pred.cmd == MemCmd::Cmp;
            if removed_completion {
                if let Some(pred) = queue.pop_back() {
                    tx.bundled.push(pred);
                }
            } else {
                pred.flit_continued = true;
            }
            Combined::Inherited {
                tx,
                removed_completion,
            }
        }
        _ => Combined::Standalone(tx),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::xbar::codec::{FlitCodec, FlitRole, FLIT_SIZE};
    use crate::xbar::packet::CreditGrant;

    fn encoded_response(codec: &mut FlitCodec, id: u64, read: bool) -> Transaction {
        let mut tx = if read {
            Transaction::read(RequestId(id), id * 64, 64)
        } else {
            Transaction::writeback(RequestId(id), id * 64, vec![0; 64])
        };
        tx.make_response();
        codec.encode(&mut tx, CreditGrant::default()).unwrap();
        tx
    }

    fn total_release(queue: &PacketQueue<Transaction>) -> u32 {
        queue.iter().map(Transaction::credit_release).sum()
    }

    #[test]
    fn completion_is_absorbed_by_queued_data_response() {
        let mut codec = FlitCodec::new(FlitRole::Device, FLIT_SIZE);
        let mut queue = PacketQueue::new(64);
        let data = encoded_response(&mut codec, 1, true);
        assert_eq!(data.reserved_for_more_ndr, 1);
        queue.schedule(0, data, 10, FLIT_SIZE).unwrap();

        let cmp = encoded_response(&mut codec, 2, false);
        let outcome = combine(&mut queue, cmp);
        assert!(matches!(outcome, Combined::Absorbed { carrier: RequestId(1) }));

        let carrier = queue.iter().next().unwrap();
        assert_eq!(carrier.reserved_for_more_ndr, 0);
        assert_eq!(carrier.bundled.len(), 1);
        assert_eq!(total_release(&queue), 2);
    }

    #[test]
    fn completion_without_room_stands_alone() {
        let mut codec = FlitCodec::new(FlitRole::Device, FLIT_SIZE);
        let mut queue = PacketQueue::new(64);
        let mut data = encoded_response(&mut codec, 1, true);
        data.reserved_for_more_ndr = 0;
        queue.schedule(0, data, 10, FLIT_SIZE).unwrap();
        let cmp = encoded_response(&mut codec, 2, false);
        assert!(matches!(combine(&mut queue, cmp), Combined::Standalone(_)));
    }

    #[test]
    fn data_inherits_and_removes_redundant_completion() {
        let mut codec = FlitCodec::new(FlitRole::Device, FLIT_SIZE);
        let mut queue = PacketQueue::new(64);
        let cmp = encoded_response(&mut codec, 1, false);
        queue.schedule(0, cmp, 10, FLIT_SIZE).unwrap();

        let data = encoded_response(&mut codec, 2, true);
        let Combined::Inherited {
            tx,
            removed_completion,
        } = combine(&mut queue, data)
        else {
            panic!("data response should inherit the open flit");
        };
        assert!(removed_completion);
        assert!(queue.is_empty());
        assert_eq!(tx.reserved_for_more_drs, 2);
        assert_eq!(tx.reserved_for_more_ndr, 1);
        assert_eq!(tx.bundled.len(), 1);
        assert_eq!(tx.credit_release(), 2);
    }

    #[test]
    fn data_chain_moves_credit_duty_to_the_tail() {
        let mut codec = FlitCodec::new(FlitRole::Device, FLIT_SIZE);
        let mut queue = PacketQueue::new(64);
        let first = encoded_response(&mut codec, 1, true);
        queue.schedule(0, first, 10, FLIT_SIZE).unwrap();

        let second = encoded_response(&mut codec, 2, true);
        let Combined::Inherited {
            tx,
            removed_completion,
        } = combine(&mut queue, second)
        else {
            panic!("second data response should chain");
        };
        assert!(!removed_completion);
        queue.schedule(0, tx, 10, FLIT_SIZE).unwrap();

        let head = queue.iter().next().unwrap();
        assert!(head.flit_continued);
        assert_eq!(total_release(&queue), 2);
    }

    #[test]
    fn data_only_looks_at_the_most_recent_unit() {
        let mut codec = FlitCodec::new(FlitRole::Device, FLIT_SIZE);
        let mut queue = PacketQueue::new(64);
        let roomy = encoded_response(&mut codec, 1, true);
        queue.schedule(0, roomy, 10, FLIT_SIZE).unwrap();
        let mut full = encoded_response(&mut codec, 2, true);
        full.reserved_for_more_drs = 0;
        queue.schedule(0, full, 10, FLIT_SIZE).unwrap();

        let data = encoded_response(&mut codec, 3, true);
        assert!(matches!(combine(&mut queue, data), Combined::Standalone(_)));
    }
}
