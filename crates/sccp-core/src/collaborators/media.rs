//! Media engine seam. RTP sessions live entirely behind this trait.

use crate::types::{CallId, Codec};

pub trait MediaEngine: Send + Sync {
    fn open_receive_channel(&self, call_id: CallId, codec: Codec) -> anyhow::Result<()>;

    fn close_receive_channel(&self, call_id: CallId);

    fn start_transmission(&self, call_id: CallId, codec: Codec) -> anyhow::Result<()>;

    fn stop_transmission(&self, call_id: CallId);

    fn find_best_joint_codec(&self, preferred: &[Codec], local: &[Codec], remote: &[Codec]) -> Option<Codec> {
        best_joint_codec(preferred, local, remote)
    }
}

/// First preferred codec both sides support, else the first common one
pub fn best_joint_codec(preferred: &[Codec], local: &[Codec], remote: &[Codec]) -> Option<Codec> {
    let supported = |codec: &Codec| {
        (local.is_empty() || local.contains(codec)) && (remote.is_empty() || remote.contains(codec))
    };
    preferred
        .iter()
        .find(|c| supported(*c))
        .or_else(|| local.iter().find(|c| remote.is_empty() || remote.contains(*c)))
        .copied()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_preference_order_wins() {
        let preferred = [Codec::G729, Codec::G711Ulaw];
        let local = [Codec::G711Ulaw, Codec::G729];
        let remote = [Codec::G711Ulaw, Codec::G729];
        assert_eq!(best_joint_codec(&preferred, &local, &remote), Some(Codec::G729));
    }

    #[test]
    fn test_falls_back_to_common_codec() {
        let preferred = [Codec::G722];
        let local = [Codec::G711Alaw, Codec::G711Ulaw];
        let remote = [Codec::G711Ulaw];
        assert_eq!(best_joint_codec(&preferred, &local, &remote), Some(Codec::G711Ulaw));
    }

    #[test]
    fn test_no_common_codec() {
        assert_eq!(best_joint_codec(&[Codec::G729], &[Codec::G729], &[Codec::G711Alaw]), None);
    }
}
